// Menu names of the controller variables, as they appear in the name map file.
pub const NAME_ON_OFF: &str = "Ein/Aus Taste";
pub const NAME_SWITCH_STATE: &str = "Schaltzustand";
pub const NAME_MANUAL_OVERRIDE: &str = "Heizen Taste";
pub const NAME_SLIDER_POSITION: &str = "Schieber Position";
pub const NAME_OUTDOOR_TEMP: &str = "Außentemperatur";

pub const LABEL_OFF: &str = "Aus";
