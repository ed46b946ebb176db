//! Attribute tree cache
//!
//! Services are stored as `"SSSS#EEEE#<uuid> "` tokens, characteristics as
//! `"HHHH#PP#EEEE#<uuid> "` tokens and descriptor values as
//! `"<uuid>#<HEX>"` records keyed by `"<remote>#HHHH"`. Numbers are
//! uppercase hex, UUIDs the lowercase hyphenated 128-bit form. Tokens that
//! do not parse are skipped.

use super::session::ServiceSession;
use super::types::{Characteristic, CharacteristicProperties, PresentationFormat, PrimaryService};
use crate::address::BdAddr;
use crate::att::constants::{CHAR_FORMAT_UUID, CHAR_USER_DESC_UUID};
use crate::error::ClientResult;
use crate::storage::DeviceStorage;
use crate::uuid::Uuid;
use log::{debug, trace};

fn parse_u16(field: &str) -> Option<u16> {
    if field.is_empty() || field.len() > 4 {
        return None;
    }
    u16::from_str_radix(field, 16).ok()
}

fn parse_u8(field: &str) -> Option<u8> {
    if field.is_empty() || field.len() > 2 {
        return None;
    }
    u8::from_str_radix(field, 16).ok()
}

pub fn services_to_string(services: &[PrimaryService]) -> String {
    services
        .iter()
        .map(|s| format!("{:04X}#{:04X}#{} ", s.start, s.end, s.uuid))
        .collect()
}

pub fn parse_services(device: &str, text: &str) -> Vec<PrimaryService> {
    text.split(' ')
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let mut fields = token.split('#');
            let start = parse_u16(fields.next()?)?;
            let end = parse_u16(fields.next()?)?;
            let uuid: Uuid = fields.next()?.parse().ok()?;
            if fields.next().is_some() || start > end {
                return None;
            }
            Some(PrimaryService::new(device, start, end, uuid))
        })
        .collect()
}

pub fn characteristics_to_string(characteristics: &[Characteristic]) -> String {
    characteristics
        .iter()
        .map(|c| {
            format!(
                "{:04X}#{:02X}#{:04X}#{} ",
                c.handle,
                c.properties.bits(),
                c.end,
                c.uuid
            )
        })
        .collect()
}

pub fn parse_characteristics(service_path: &str, text: &str) -> Vec<Characteristic> {
    text.split(' ')
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let mut fields = token.split('#');
            let handle = parse_u16(fields.next()?)?;
            let properties = CharacteristicProperties::from_bits_retain(parse_u8(fields.next()?)?);
            let end = parse_u16(fields.next()?)?;
            let uuid: Uuid = fields.next()?.parse().ok()?;
            if fields.next().is_some() {
                return None;
            }
            Some(Characteristic::new(service_path, handle, end, properties, uuid))
        })
        .collect()
}

pub fn attribute_key(remote: &BdAddr, handle: u16) -> String {
    format!("{}#{:04X}", remote, handle)
}

pub fn attribute_value(attribute_type: u16, value: &[u8]) -> String {
    format!(
        "{}#{}",
        Uuid::from_u16(attribute_type),
        hex::encode_upper(value)
    )
}

/// A decoded attribute record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub remote: String,
    pub handle: u16,
    pub attribute_type: Uuid,
    pub value: Vec<u8>,
}

pub fn parse_attribute(key: &str, value: &str) -> Option<AttributeRecord> {
    let (remote, handle) = key.rsplit_once('#')?;
    let (uuid, data) = value.split_once('#')?;

    Some(AttributeRecord {
        remote: remote.to_string(),
        handle: parse_u16(handle)?,
        attribute_type: uuid.parse().ok()?,
        value: hex::decode(data).ok()?,
    })
}

pub fn store_services(session: &ServiceSession, storage: &mut dyn DeviceStorage) -> ClientResult<()> {
    let text = services_to_string(&session.services);
    storage.write_services(&session.local, &session.remote, &text)?;
    Ok(())
}

pub fn store_characteristics(
    session: &ServiceSession,
    service_start: u16,
    storage: &mut dyn DeviceStorage,
) -> ClientResult<()> {
    let Some(service) = session.service(service_start) else {
        return Ok(());
    };

    let text = characteristics_to_string(&service.characteristics);
    storage.write_characteristics(&session.local, &session.remote, service.start, &text)?;
    Ok(())
}

pub fn store_attribute(
    session: &ServiceSession,
    storage: &mut dyn DeviceStorage,
    handle: u16,
    attribute_type: u16,
    value: &[u8],
) -> ClientResult<()> {
    storage.write_attribute(
        &session.local,
        &attribute_key(&session.remote, handle),
        &attribute_value(attribute_type, value),
    )?;
    Ok(())
}

/// Fills the session's service list from storage. Returns `false` when the
/// session already has services or nothing usable is stored.
pub fn load_services(session: &mut ServiceSession, storage: &dyn DeviceStorage) -> ClientResult<bool> {
    if !session.services.is_empty() {
        debug!("Services already loaded");
        return Ok(false);
    }

    let Some(text) = storage.read_services(&session.local, &session.remote)? else {
        return Ok(false);
    };

    let services = parse_services(&session.device, &text);
    if services.is_empty() {
        return Ok(false);
    }

    session.services = services;
    Ok(true)
}

/// Fills one service's characteristics from storage. Returns `false` when
/// the service already has characteristics or nothing usable is stored.
pub fn load_characteristics(
    session: &mut ServiceSession,
    service_start: u16,
    storage: &dyn DeviceStorage,
) -> ClientResult<bool> {
    let (local, remote) = (session.local, session.remote);
    let Some(service) = session.service_mut(service_start) else {
        return Ok(false);
    };

    if !service.characteristics.is_empty() {
        debug!("Characteristics already loaded");
        return Ok(false);
    }

    let Some(text) = storage.read_characteristics(&local, &remote, service.start)? else {
        return Ok(false);
    };

    let characteristics = parse_characteristics(&service.path, &text);
    if characteristics.is_empty() {
        return Ok(false);
    }

    service.characteristics = characteristics;
    Ok(true)
}

/// Applies stored descriptor records of this remote to the loaded tree
pub fn load_attributes(session: &mut ServiceSession, storage: &dyn DeviceStorage) -> ClientResult<()> {
    let remote = session.remote.to_string();

    for (key, value) in storage.read_attributes(&session.local)? {
        let Some(record) = parse_attribute(&key, &value) else {
            trace!("Skipping malformed attribute record {}", key);
            continue;
        };

        if record.remote != remote {
            continue;
        }

        let Some(chr) = session
            .services
            .iter_mut()
            .find(|s| s.contains(record.handle))
            .and_then(|s| s.characteristics.iter_mut().find(|c| c.contains(record.handle)))
        else {
            continue;
        };

        if record.attribute_type == CHAR_USER_DESC_UUID {
            chr.description = Some(description_from_bytes(&record.value));
        } else if record.attribute_type == CHAR_FORMAT_UUID {
            if let Some(format) = PresentationFormat::parse(&record.value) {
                chr.format = Some(format);
            }
        }
    }

    Ok(())
}

/// User description text, without trailing NULs
pub fn description_from_bytes(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::transport::ConnectionProfile;

    const DEVICE: &str = "/org/bluez/hci0/dev_00_11_22_33_44_55";

    fn session() -> ServiceSession {
        ServiceSession::new(
            DEVICE,
            BdAddr::new([0xAA; 6]),
            BdAddr::new([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]),
            ConnectionProfile::LowEnergy,
        )
    }

    #[test]
    fn test_service_string_format() {
        let services = vec![
            PrimaryService::new(DEVICE, 0x0001, 0x0005, Uuid::from_u16(0x1800)),
            PrimaryService::new(DEVICE, 0x0006, 0xFFFF, Uuid::from_u16(0x180F)),
        ];

        assert_eq!(
            services_to_string(&services),
            "0001#0005#00001800-0000-1000-8000-00805f9b34fb \
             0006#FFFF#0000180f-0000-1000-8000-00805f9b34fb "
        );
    }

    #[test]
    fn test_service_list_round_trip() {
        let custom: Uuid = "f000aa00-0451-4000-b000-000000000000".parse().unwrap();
        let services = vec![
            PrimaryService::new(DEVICE, 0x0001, 0x000B, Uuid::from_u16(0x1800)),
            PrimaryService::new(DEVICE, 0x000C, 0x0020, custom),
        ];

        let parsed = parse_services(DEVICE, &services_to_string(&services));
        assert_eq!(parsed.len(), 2);
        for (a, b) in services.iter().zip(parsed.iter()) {
            assert_eq!((a.start, a.end, a.uuid), (b.start, b.end, b.uuid));
            assert_eq!(a.path, b.path);
        }
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        let text = "0001#0005#00001800-0000-1000-8000-00805f9b34fb \
                    zz#0009#00001801-0000-1000-8000-00805f9b34fb \
                    000A#0010 \
                    0020#0010#0000180f-0000-1000-8000-00805f9b34fb \
                    0030#0040#not-a-uuid ";
        let parsed = parse_services(DEVICE, text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].start, 0x0001);

        let chars = parse_characteristics("/s", "0003#1A#0005#00002a19-0000-1000-8000-00805f9b34fb 0007#XYZ#0009#x ");
        assert_eq!(chars.len(), 1);
        assert_eq!(
            chars[0].properties,
            CharacteristicProperties::READ | CharacteristicProperties::WRITE | CharacteristicProperties::NOTIFY
        );
    }

    #[test]
    fn test_characteristic_string_format() {
        let chr = Characteristic::new(
            "/s",
            0x0003,
            0x0005,
            CharacteristicProperties::READ,
            Uuid::from_u16(0x2A00),
        );
        assert_eq!(
            characteristics_to_string(&[chr]),
            "0003#02#0005#00002a00-0000-1000-8000-00805f9b34fb "
        );
    }

    #[test]
    fn test_attribute_record_format() {
        let remote = BdAddr::new([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
        assert_eq!(attribute_key(&remote, 0x000F), "00:11:22:33:44:55#000F");
        assert_eq!(
            attribute_value(CHAR_USER_DESC_UUID, b"Temp"),
            "00002901-0000-1000-8000-00805f9b34fb#54656D70"
        );

        let record = parse_attribute(
            "00:11:22:33:44:55#000F",
            "00002901-0000-1000-8000-00805f9b34fb#54656D70",
        )
        .unwrap();
        assert_eq!(record.handle, 0x000F);
        assert_eq!(record.value, b"Temp".to_vec());

        assert!(parse_attribute("00:11:22:33:44:55", "x#00").is_none());
        assert!(parse_attribute("00:11:22:33:44:55#000F", "00002901-0000-1000-8000-00805f9b34fb#5").is_none());
    }

    #[test]
    fn test_characteristic_load_is_idempotent() {
        let mut storage = MemoryStorage::new();
        let mut s = session();
        s.services.push(PrimaryService::new(DEVICE, 0x0001, 0x0010, Uuid::from_u16(0x180F)));

        storage
            .write_characteristics(
                &s.local,
                &s.remote,
                0x0001,
                "0003#12#0010#00002a19-0000-1000-8000-00805f9b34fb ",
            )
            .unwrap();

        assert!(load_characteristics(&mut s, 0x0001, &storage).unwrap());
        assert_eq!(s.services[0].characteristics.len(), 1);

        storage
            .write_characteristics(
                &s.local,
                &s.remote,
                0x0001,
                "0003#12#0008#00002a19-0000-1000-8000-00805f9b34fb 0009#02#0010#00002a1a-0000-1000-8000-00805f9b34fb ",
            )
            .unwrap();

        assert!(!load_characteristics(&mut s, 0x0001, &storage).unwrap());
        assert_eq!(s.services[0].characteristics.len(), 1);
        assert_eq!(s.services[0].characteristics[0].end, 0x0010);
    }

    #[test]
    fn test_round_trip_through_storage() {
        let mut storage = MemoryStorage::new();
        let mut stored = session();
        let mut service = PrimaryService::new(DEVICE, 0x0001, 0x0010, Uuid::from_u16(0x180F));
        service.characteristics.push(Characteristic::new(
            &service.path,
            0x0003,
            0x0010,
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            Uuid::from_u16(0x2A19),
        ));
        stored.services.push(service);

        store_services(&stored, &mut storage).unwrap();
        store_characteristics(&stored, 0x0001, &mut storage).unwrap();
        store_attribute(&stored, &mut storage, 0x0004, CHAR_USER_DESC_UUID, b"Battery\0").unwrap();
        store_attribute(
            &stored,
            &mut storage,
            0x0005,
            CHAR_FORMAT_UUID,
            &[0x04, 0x00, 0xAD, 0x27, 0x01, 0x00, 0x00],
        )
        .unwrap();

        let mut loaded = session();
        assert!(load_services(&mut loaded, &storage).unwrap());
        assert!(load_characteristics(&mut loaded, 0x0001, &storage).unwrap());
        load_attributes(&mut loaded, &storage).unwrap();

        let chr = &loaded.services[0].characteristics[0];
        assert_eq!(chr.path, format!("{}/service0001/characteristic0003", DEVICE));
        assert_eq!(chr.description.as_deref(), Some("Battery"));
        assert_eq!(chr.format.map(|f| f.unit), Some(0x27AD));

        assert!(!load_services(&mut loaded, &storage).unwrap());
    }
}
