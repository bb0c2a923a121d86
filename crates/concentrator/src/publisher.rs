//! Publish hook.

use crate::Frame;

/// Receives each ready frame exactly once, in ascending timestamp order.
///
/// Called from the scheduler task; implementations should hand the frame off
/// quickly. Errors and panics are reported as
/// [`ConcentratorEvent::ProcessException`](crate::ConcentratorEvent) and do
/// not stop publication.
pub trait FramePublisher: Send + Sync + 'static {
    fn publish_frame(&self, frame: &Frame, index: usize) -> anyhow::Result<()>;
}

impl<F> FramePublisher for F
where
    F: Fn(&Frame, usize) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn publish_frame(&self, frame: &Frame, index: usize) -> anyhow::Result<()> {
        self(frame, index)
    }
}
