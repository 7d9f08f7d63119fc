/// Minimum pixel count (rows*cols) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Number of image rows per parallel work unit. Partial accumulators are
/// merged in ascending chunk order, so repeated parallel runs on the same
/// input are bit-identical.
pub const ROW_CHUNK: usize = 64;
