pub mod cutter;
pub mod device;

pub use cutter::{CutOutcome, CutterWorker, WorkerHandle, WorkerStats};
pub use device::CutterDevice;
