pub mod backends;
pub mod runner;

pub use backends::{CorpusBackend, TextFilesBackend, ToolchainBackend};
pub use runner::{
    default_output_path, instrument, validate_images, InstrumentReport, InstrumentRequest,
    RunStatus,
};
