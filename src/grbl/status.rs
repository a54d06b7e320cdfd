//! Connection state and GRBL status-frame parsing.

/// Lifecycle state of the controller link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link to the controller.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Link established, controller acknowledged.
    Connected,
    /// Link is up but the controller reported an alarm.
    Alarm,
}

impl ConnectionState {
    /// The link is usable for sending commands. An alarmed controller is
    /// still reachable (real-time bytes and `$X` must get through).
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Alarm)
    }
}

/// Snapshot of one parsed `<...>` status frame.
///
/// Fields not present in the frame stay `None`; the struct is rebuilt from
/// scratch for every frame and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrblStatus {
    /// Machine state name (`Idle`, `Run`, `Hold`, `Alarm`, ...).
    pub state: String,
    /// Machine position, as reported (`MPos:x,y,z`).
    pub mpos: Option<String>,
    /// Work position (`WPos:x,y,z`).
    pub wpos: Option<String>,
    /// Limit-switch state (`Lim:...`).
    pub limits: Option<String>,
    /// Active input pins (`Pn:XY`).
    pub pins: Option<String>,
}

impl GrblStatus {
    /// Parse a raw status frame like `<Run|MPos:1.000,2.000,0.000|Pn:XY>`.
    ///
    /// Unknown `Key:Value` fields are ignored.
    pub fn parse(payload: &str) -> Self {
        let inner = payload.trim().trim_matches(|c| c == '<' || c == '>');
        let mut parts = inner.split('|');

        let state = match parts.next() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "Unknown".to_string(),
        };

        let mut status = GrblStatus {
            state,
            ..GrblStatus::default()
        };
        for field in parts {
            if let Some(v) = field.strip_prefix("MPos:") {
                status.mpos = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("WPos:") {
                status.wpos = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("Pn:") {
                status.pins = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("Lim:") {
                status.limits = Some(v.to_string());
            }
        }
        status
    }
}
