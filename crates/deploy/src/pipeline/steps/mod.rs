//! Step kinds, one module each.

mod attach;
mod call;
mod deploy;
mod factory;
mod ownership;
mod verify;

pub use attach::AttachStep;
pub use call::CallStep;
pub use deploy::DeployStep;
pub use factory::FactoryStep;
pub use ownership::TransferOwnershipStep;
pub use verify::VerifyStep;
