/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → starting → running → stopping → idle
///           ↓
///         idle (negotiation failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}
