pub mod process;
pub mod stubs;
pub mod traits;
