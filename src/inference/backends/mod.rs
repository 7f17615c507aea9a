pub mod constant;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use constant::ConstantModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
