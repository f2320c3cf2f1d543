// Canonical `<event type="...">` names emitted by the agent
pub struct EventTypes;

impl EventTypes {
    pub const GEOCODE: &'static str = "geocode";
    pub const ADDRESS: &'static str = "address";
    pub const WINDY: &'static str = "windy";
    pub const CCTV: &'static str = "cctv";
    pub const ROUTE: &'static str = "example1";
    pub const ALERT: &'static str = "example2";

    #[cfg(test)]
    pub const ALL: [&'static str; 6] = [
        Self::GEOCODE,
        Self::ADDRESS,
        Self::WINDY,
        Self::CCTV,
        Self::ROUTE,
        Self::ALERT,
    ];
}
