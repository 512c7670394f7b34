//! Textual function signatures and ABI value helpers.
//!
//! Scripts and scenarios name functions the way Solidity prints them, e.g.
//! `setVoter(address)` or `getGauge(address) returns (uint256,address)`.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Bytes, Selector, keccak256},
};
use anyhow::{Context, Result};

/// A parsed function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub name: String,
    pub inputs: Vec<DynSolType>,
    pub outputs: Vec<DynSolType>,
}

impl FunctionSig {
    /// Parse `name(types)` with an optional `returns (types)` suffix.
    ///
    /// A leading `function` keyword, parameter names and modifiers such as `view` are
    /// tolerated.
    pub fn parse(signature: &str) -> Result<Self> {
        let signature = signature.trim();
        let signature = signature
            .strip_prefix("function ")
            .unwrap_or(signature)
            .trim_start();

        let open = signature
            .find('(')
            .with_context(|| format!("Missing `(` in function signature `{}`", signature))?;
        let name = signature[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("Invalid function name in signature `{}`", signature);
        }

        let (inputs, rest) = split_group(&signature[open..])
            .with_context(|| format!("Unbalanced parentheses in `{}`", signature))?;

        let outputs = match rest.find("returns") {
            Some(pos) => {
                let (outputs, trailing) = split_group(rest[pos + "returns".len()..].trim_start())
                    .with_context(|| format!("Malformed returns clause in `{}`", signature))?;
                if !trailing.trim().is_empty() {
                    anyhow::bail!("Unexpected trailing text `{}` in `{}`", trailing.trim(), signature);
                }
                parse_params(outputs)?
            }
            None => Vec::new(),
        };

        Ok(Self {
            name: name.to_string(),
            inputs: parse_params(inputs)?,
            outputs,
        })
    }

    /// The canonical form hashed into the selector, e.g. `createPlugin(address,string)`.
    pub fn canonical(&self) -> String {
        let inputs = self
            .inputs
            .iter()
            .map(|ty| ty.sol_type_name().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", self.name, inputs)
    }

    pub fn selector(&self) -> Selector {
        Selector::from_slice(&keccak256(self.canonical().as_bytes())[..4])
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn encode_call(&self, args: Vec<DynSolValue>) -> Result<Bytes> {
        if args.len() != self.inputs.len() {
            anyhow::bail!(
                "{} expects {} argument(s), got {}",
                self.canonical(),
                self.inputs.len(),
                args.len()
            );
        }

        let mut data = self.selector().to_vec();
        data.extend(DynSolValue::Tuple(args).abi_encode_params());
        Ok(Bytes::from(data))
    }

    /// Decode return data according to the declared outputs.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<DynSolValue>> {
        if self.outputs.is_empty() {
            return Ok(Vec::new());
        }

        let decoded = DynSolType::Tuple(self.outputs.clone())
            .abi_decode_params(data)
            .with_context(|| format!("Failed to decode return data of {}", self.canonical()))?;

        match decoded {
            DynSolValue::Tuple(values) => Ok(values),
            other => Ok(vec![other]),
        }
    }
}

impl std::fmt::Display for FunctionSig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())?;
        if !self.outputs.is_empty() {
            let outputs = self
                .outputs
                .iter()
                .map(|ty| ty.sol_type_name().into_owned())
                .collect::<Vec<_>>()
                .join(",");
            write!(f, " returns ({})", outputs)?;
        }
        Ok(())
    }
}

/// Parse a list of Solidity type names, e.g. `["address", "uint256[]"]`.
pub fn parse_types<S: AsRef<str>>(types: &[S]) -> Result<Vec<DynSolType>> {
    types
        .iter()
        .map(|ty| {
            DynSolType::parse(ty.as_ref().trim())
                .with_context(|| format!("Invalid Solidity type `{}`", ty.as_ref()))
        })
        .collect()
}

/// ABI-encode constructor arguments (no selector).
pub fn encode_constructor_args(args: Vec<DynSolValue>) -> Bytes {
    Bytes::from(DynSolValue::Tuple(args).abi_encode_params())
}

/// Human-readable rendering used in logs and query tables.
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            format!("[{}]", join_values(values))
        }
        DynSolValue::Tuple(values) => format!("({})", join_values(values)),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

fn join_values(values: &[DynSolValue]) -> String {
    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

/// Split a leading parenthesised group off `s`, returning its contents and the rest.
fn split_group(s: &str) -> Option<(&str, &str)> {
    if !s.starts_with('(') {
        return None;
    }

    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[1..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on top-level commas and drop parameter names.
fn parse_params(params: &str) -> Result<Vec<DynSolType>> {
    if params.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut types = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                types.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    types.push(&params[start..]);

    types
        .into_iter()
        .map(|param| {
            let param = param.trim();
            let ty = strip_param_name(param);
            DynSolType::parse(ty)
                .with_context(|| format!("Invalid parameter type `{}`", param))
        })
        .collect()
}

/// `uint256 amount` -> `uint256`, `(address,uint256)[] memory items` -> `(address,uint256)[]`.
fn strip_param_name(param: &str) -> &str {
    let mut depth = 0usize;
    for (i, c) in param.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => return &param[..i],
            _ => {}
        }
    }
    param
}
