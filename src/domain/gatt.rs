//! GATT helpers
//!
//! Characteristic property decoding, short-form UUID handling and the
//! assigned-number table for standard services.

use uuid::Uuid;

/// Raw characteristic property bits as they cross the adapter boundary.
///
/// The low byte follows the GATT characteristic properties field; the two
/// encryption bits follow the CoreBluetooth extension.
pub mod property_bits {
    pub const BROADCAST: u16 = 0x0001;
    pub const READ: u16 = 0x0002;
    pub const WRITE_WITHOUT_RESPONSE: u16 = 0x0004;
    pub const WRITE: u16 = 0x0008;
    pub const NOTIFY: u16 = 0x0010;
    pub const INDICATE: u16 = 0x0020;
    pub const AUTHENTICATED_SIGNED_WRITES: u16 = 0x0040;
    pub const EXTENDED_PROPERTIES: u16 = 0x0080;
    pub const NOTIFY_ENCRYPTION_REQUIRED: u16 = 0x0100;
    pub const INDICATE_ENCRYPTION_REQUIRED: u16 = 0x0200;

    pub const ALL: u16 = 0x03FF;
}

/// Decoded capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
    pub notify_encryption_required: bool,
    pub indicate_encryption_required: bool,
}

impl CharacteristicProperties {
    /// Decode raw property bits. Bits outside [`property_bits::ALL`] are ignored.
    pub fn from_bits(bits: u16) -> Self {
        use property_bits::*;
        let has = |flag: u16| bits & flag != 0;
        Self {
            broadcast: has(BROADCAST),
            read: has(READ),
            write_without_response: has(WRITE_WITHOUT_RESPONSE),
            write: has(WRITE),
            notify: has(NOTIFY),
            indicate: has(INDICATE),
            authenticated_signed_writes: has(AUTHENTICATED_SIGNED_WRITES),
            extended_properties: has(EXTENDED_PROPERTIES),
            notify_encryption_required: has(NOTIFY_ENCRYPTION_REQUIRED),
            indicate_encryption_required: has(INDICATE_ENCRYPTION_REQUIRED),
        }
    }

    pub fn bits(&self) -> u16 {
        self.entries()
            .iter()
            .filter(|(_, set, _)| *set)
            .fold(0, |acc, (bit, _, _)| acc | bit)
    }

    /// Names of the flags that are set, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries()
            .iter()
            .filter(|(_, set, _)| *set)
            .map(|(_, _, name)| *name)
            .collect()
    }

    /// Whether the characteristic can push values (notify or indicate).
    pub fn is_subscribable(&self) -> bool {
        self.notify || self.indicate
    }

    fn entries(&self) -> [(u16, bool, &'static str); 10] {
        use property_bits::*;
        [
            (BROADCAST, self.broadcast, "broadcast"),
            (READ, self.read, "read"),
            (
                WRITE_WITHOUT_RESPONSE,
                self.write_without_response,
                "writeWithoutResponse",
            ),
            (WRITE, self.write, "write"),
            (NOTIFY, self.notify, "notify"),
            (INDICATE, self.indicate, "indicate"),
            (
                AUTHENTICATED_SIGNED_WRITES,
                self.authenticated_signed_writes,
                "authenticatedSignedWrites",
            ),
            (
                EXTENDED_PROPERTIES,
                self.extended_properties,
                "extendedProperties",
            ),
            (
                NOTIFY_ENCRYPTION_REQUIRED,
                self.notify_encryption_required,
                "notifyEncryptionRequired",
            ),
            (
                INDICATE_ENCRYPTION_REQUIRED,
                self.indicate_encryption_required,
                "indicateEncryptionRequired",
            ),
        ]
    }
}

/// Bluetooth Base UUID: 00000000-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const BASE_MASK: u128 = (1 << 96) - 1;

/// Parse a UUID in full (`0000180a-0000-...`) or short (`180A`, `0x180A`,
/// `0000180A`) form.
pub fn parse_uuid(text: &str) -> Option<Uuid> {
    let trimmed = text.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    match hex.len() {
        4 | 8 => {
            let short = u32::from_str_radix(hex, 16).ok()?;
            Some(Uuid::from_u128(((short as u128) << 96) | BASE_UUID))
        }
        _ => Uuid::parse_str(hex).ok(),
    }
}

/// The 16-bit assigned number of a UUID derived from the Base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & BASE_MASK != BASE_UUID || value >> 96 > 0xFFFF {
        return None;
    }
    Some((value >> 96) as u16)
}

/// Compare two UUID strings regardless of short/full form and case.
pub fn uuids_match(a: &str, b: &str) -> bool {
    match (parse_uuid(a), parse_uuid(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// Name of a standard GATT service, if the UUID is an assigned number.
pub fn service_name(uuid: &str) -> Option<&'static str> {
    let short = short_uuid(&parse_uuid(uuid)?)?;
    ASSIGNED_SERVICES
        .iter()
        .find(|(number, _)| *number == short)
        .map(|(_, name)| *name)
}

/// Standard GATT services (org.bluetooth.service.*)
pub const ASSIGNED_SERVICES: &[(u16, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time Service"),
    (0x1806, "Reference Time Update Service"),
    (0x1807, "Next DST Change Service"),
    (0x1808, "Glucose"),
    (0x1809, "Health Thermometer"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180E, "Phone Alert Status Service"),
    (0x180F, "Battery Service"),
    (0x1810, "Blood Pressure"),
    (0x1811, "Alert Notification Service"),
    (0x1812, "Human Interface Device"),
    (0x1813, "Scan Parameters"),
    (0x1814, "Running Speed and Cadence"),
    (0x1815, "Automation IO"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1818, "Cycling Power"),
    (0x1819, "Location and Navigation"),
    (0x181A, "Environmental Sensing"),
    (0x181B, "Body Composition"),
    (0x181C, "User Data"),
    (0x181D, "Weight Scale"),
    (0x181E, "Bond Management Service"),
    (0x181F, "Continuous Glucose Monitoring"),
    (0x1820, "Internet Protocol Support Service"),
    (0x1821, "Indoor Positioning"),
    (0x1822, "Pulse Oximeter Service"),
    (0x1823, "HTTP Proxy"),
    (0x1824, "Transport Discovery"),
    (0x1825, "Object Transfer Service"),
    (0x1826, "Fitness Machine"),
    (0x1827, "Mesh Provisioning Service"),
    (0x1828, "Mesh Proxy Service"),
    (0x1829, "Reconnection Configuration"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_flags_decode_individually() {
        let props = CharacteristicProperties::from_bits(property_bits::ALL);
        assert!(props.broadcast);
        assert!(props.read);
        assert!(props.write_without_response);
        assert!(props.write);
        assert!(props.notify);
        assert!(props.indicate);
        assert!(props.authenticated_signed_writes);
        assert!(props.extended_properties);
        assert!(props.notify_encryption_required);
        assert!(props.indicate_encryption_required);
        assert_eq!(props.bits(), property_bits::ALL);
        assert_eq!(props.names().len(), 10);
    }

    #[test]
    fn test_single_flags() {
        let read_only = CharacteristicProperties::from_bits(property_bits::READ);
        assert_eq!(read_only.names(), vec!["read"]);
        assert!(!read_only.is_subscribable());

        let indicate = CharacteristicProperties::from_bits(
            property_bits::INDICATE | property_bits::INDICATE_ENCRYPTION_REQUIRED,
        );
        assert!(indicate.is_subscribable());
        assert!(!indicate.notify_encryption_required);
    }

    #[test]
    fn test_unknown_bits_ignored() {
        let props = CharacteristicProperties::from_bits(0xFC00 | property_bits::WRITE);
        assert_eq!(props.bits(), property_bits::WRITE);
    }

    #[test]
    fn test_short_and_full_uuids_match() {
        assert!(uuids_match("180A", "0000180a-0000-1000-8000-00805f9b34fb"));
        assert!(uuids_match("0x1800", "1800"));
        assert!(!uuids_match("1800", "1801"));
        assert!(uuids_match("AA:identity1", "aa:IDENTITY1"));
    }

    #[test]
    fn test_short_uuid() {
        let uuid = parse_uuid("0000180f-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(short_uuid(&uuid), Some(0x180F));

        let vendor = parse_uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(short_uuid(&vendor), None);
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("0x1800"), Some("Generic Access"));
        assert_eq!(service_name("180D"), Some("Heart Rate"));
        assert_eq!(service_name("6e400002-b5a3-f393-e0a9-e50e24dcca9e"), None);
    }
}
