pub mod pipeline;
pub mod runs;
