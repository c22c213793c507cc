//! Resolution of `ConfigRequest` lookups against a brick's device registry.

use common::protocol::{DeviceQuery, DriverName};
use common::{normalize_port, BrickId};
use serde_json::Value;

use crate::DeviceKey;

/// Address returned for any `leds` lookup.
pub const LEDS_ADDRESS: &str = "leds_addr";
/// Address returned when no single device matches.
pub const NOT_CONNECTED: &str = "dev_not_connected";
/// Driver assumed for `tacho-motor` lookups that name none.
pub const DEFAULT_MOTOR_DRIVER: &str = "lego-ev3-l-motor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    TachoMotor,
    Sensor,
    Sound,
}

impl DeviceClass {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::TachoMotor => "tacho-motor",
            DeviceClass::Sensor => "lego-sensor",
            DeviceClass::Sound => "sound",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tacho-motor" => Some(DeviceClass::TachoMotor),
            "lego-sensor" => Some(DeviceClass::Sensor),
            "sound" => Some(DeviceClass::Sound),
            _ => None,
        }
    }
}

/// One registered device as seen by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub key: DeviceKey,
    pub driver: String,
    pub class: DeviceClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    Leds,
    NotConnected,
}

impl Resolution {
    pub fn address(&self) -> &str {
        match self {
            Resolution::Found(address) => address,
            Resolution::Leds => LEDS_ADDRESS,
            Resolution::NotConnected => NOT_CONNECTED,
        }
    }

    pub fn into_value(self) -> Value {
        Value::from(self.address())
    }
}

/// Finds the device a `ConfigRequest` refers to on `brick`.
///
/// An explicit address is accepted only if a device is registered there and
/// its driver passes the filter. Without an address, exactly one device must
/// match the class and driver filter; none or several is `NotConnected`.
pub fn resolve(
    devices: &[DeviceEntry],
    brick: BrickId,
    query: &DeviceQuery,
    class_name: &str,
) -> Resolution {
    if class_name == "leds" {
        return Resolution::Leds;
    }

    let class = DeviceClass::from_name(class_name);
    let driver_filter = match (&query.driver_name, class) {
        (Some(filter), _) => Some(filter.clone()),
        (None, Some(DeviceClass::TachoMotor)) => {
            Some(DriverName::One(DEFAULT_MOTOR_DRIVER.to_string()))
        }
        (None, _) => None,
    };
    let accepts = |entry: &&DeviceEntry| {
        entry.key.brick == brick
            && class.map_or(true, |c| entry.class == c)
            && driver_filter
                .as_ref()
                .map_or(true, |filter| filter.matches(&entry.driver))
    };

    match &query.address {
        Some(address) => {
            let address = normalize_port(address);
            devices
                .iter()
                .filter(|entry| entry.key.address == address)
                .find(accepts)
                .map_or(Resolution::NotConnected, |_| Resolution::Found(address))
        }
        None => {
            let mut matches = devices.iter().filter(accepts);
            match (matches.next(), matches.next()) {
                (Some(entry), None) => Resolution::Found(entry.key.address.clone()),
                _ => Resolution::NotConnected,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(brick: usize, address: &str, driver: &str, class: DeviceClass) -> DeviceEntry {
        DeviceEntry {
            key: DeviceKey::new(BrickId(brick), address),
            driver: driver.to_string(),
            class,
        }
    }

    fn registry() -> Vec<DeviceEntry> {
        vec![
            entry(0, "ev3-ports:outA", "lego-ev3-l-motor", DeviceClass::TachoMotor),
            entry(0, "ev3-ports:outB", "lego-nxt-motor", DeviceClass::TachoMotor),
            entry(0, "ev3-ports:outC", "lego-ev3-m-motor", DeviceClass::TachoMotor),
            entry(0, "ev3-ports:in1", "lego-ev3-touch", DeviceClass::Sensor),
            entry(0, "ev3-ports:speaker", "ev3-speaker", DeviceClass::Sound),
            entry(1, "ev3-ports:in2", "lego-ev3-color", DeviceClass::Sensor),
        ]
    }

    fn query(address: Option<&str>, driver_name: Option<DriverName>) -> DeviceQuery {
        DeviceQuery {
            address: address.map(str::to_string),
            driver_name,
        }
    }

    #[test]
    fn leds_always_resolve() {
        let result = resolve(&registry(), BrickId(0), &query(None, None), "leds");
        assert_eq!(result.address(), LEDS_ADDRESS);
    }

    #[test]
    fn explicit_address_with_default_motor_driver() {
        let devices = registry();
        let found = resolve(&devices, BrickId(0), &query(Some("outA"), None), "tacho-motor");
        assert_eq!(found, Resolution::Found("ev3-ports:outA".into()));

        // outB is a motor, but not of the default driver.
        let missing = resolve(&devices, BrickId(0), &query(Some("outB"), None), "tacho-motor");
        assert_eq!(missing, Resolution::NotConnected);
    }

    #[test]
    fn explicit_address_must_exist_on_this_brick() {
        let devices = registry();
        let result = resolve(&devices, BrickId(0), &query(Some("in2"), None), "lego-sensor");
        assert_eq!(result, Resolution::NotConnected);
        let result = resolve(&devices, BrickId(1), &query(Some("in2"), None), "lego-sensor");
        assert_eq!(result.address(), "ev3-ports:in2");
    }

    #[test]
    fn ambiguous_driver_list_is_not_connected() {
        let drivers = DriverName::Any(vec!["lego-ev3-l-motor".into(), "lego-nxt-motor".into()]);
        let result = resolve(&registry(), BrickId(0), &query(None, Some(drivers)), "tacho-motor");
        assert_eq!(result.address(), NOT_CONNECTED);
    }

    #[test]
    fn unique_driver_match_without_address() {
        let drivers = DriverName::One("lego-ev3-m-motor".into());
        let result = resolve(&registry(), BrickId(0), &query(None, Some(drivers)), "tacho-motor");
        assert_eq!(result, Resolution::Found("ev3-ports:outC".into()));

        let result = resolve(&registry(), BrickId(0), &query(None, None), "sound");
        assert_eq!(result.address(), "ev3-ports:speaker");
    }

    #[test]
    fn class_mismatch_is_not_connected() {
        let result = resolve(&registry(), BrickId(0), &query(Some("in1"), None), "tacho-motor");
        assert_eq!(result, Resolution::NotConnected);
    }

    #[test]
    fn resolution_serializes_as_string() {
        assert_eq!(Resolution::NotConnected.into_value(), Value::from(NOT_CONNECTED));
    }
}
