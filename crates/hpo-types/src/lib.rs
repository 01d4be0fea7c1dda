pub mod experiment;
pub mod instance;
pub mod job_name;
pub mod results;
pub mod errors;

pub use experiment::*;
pub use instance::*;
pub use job_name::*;
pub use results::*;
pub use errors::*;
