/// Engine version string, recorded in the metadata of every backup so a
/// restore can tell which engine produced the artefact.
pub const RYU_VERSION: &str = env!("CARGO_PKG_VERSION");
