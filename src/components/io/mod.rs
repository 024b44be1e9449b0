pub mod output_latch;

pub use output_latch::OutputLatch;
