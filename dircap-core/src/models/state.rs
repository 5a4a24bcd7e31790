/// Global lifecycle of the interception engine.
///
/// ```text
/// Idle → FactoryHooked → TornDown
/// ```
///
/// Devices and buffers move through their own sub-states independently
/// (device intercepted → buffer intercepted → format known / capturing);
/// those are tracked per instance by the dispatch-table hooks and the
/// single capture session, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    FactoryHooked,
    TornDown,
}

impl EnginePhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::FactoryHooked)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown)
    }
}
