use crate::job::CutterJob;

/// The physical cutter. Implementations stream `job.plt_file` to the device
/// and block until the cut finishes.
///
/// An `Err` is a routine cutting failure: its message becomes the job's
/// `error_message` and the job is not retried.
pub trait CutterDevice: Send {
    fn cut(&mut self, job: &CutterJob) -> Result<(), String>;
}

impl<F> CutterDevice for F
where
    F: FnMut(&CutterJob) -> Result<(), String> + Send,
{
    fn cut(&mut self, job: &CutterJob) -> Result<(), String> {
        self(job)
    }
}
