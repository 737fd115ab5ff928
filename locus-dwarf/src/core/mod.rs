pub mod config;
pub mod errors;
pub mod types;

pub use config::EvalConfig;
pub use errors::{ExprError, Result};
pub use types::{
    CallSiteParameter, CallSiteParameterKind, CompUnit, FrameRef, LocExprBlock, ModuleId,
    ObjectAddressInfo,
};
