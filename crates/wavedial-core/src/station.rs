//! Station catalog loaded from the bundled station list.

use heapless::{String, Vec};
use serde::Deserialize;

pub const MAX_STATIONS: usize = 16;
pub const STATION_NAME_BYTES: usize = 32;
pub const STATION_HOST_BYTES: usize = 64;
pub const STATION_PATH_BYTES: usize = 96;

/// One stream source. Identity is the position in the [`Catalog`]; the
/// persisted selection and the dial both address stations by index.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Station {
    pub name: String<STATION_NAME_BYTES>,
    pub host: String<STATION_HOST_BYTES>,
    pub port: u16,
    pub path: String<STATION_PATH_BYTES>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CatalogError {
    /// Malformed JSON, a missing field, or an oversized entry.
    Parse,
    /// Parsed fine but contains no stations.
    Empty,
    /// A station carries port 0.
    InvalidPort { index: usize },
}

/// Ordered, read-only station list. Loaded once at boot; never mutated.
#[derive(Debug)]
pub struct Catalog {
    stations: Vec<Station, MAX_STATIONS>,
}

impl Catalog {
    /// Parse the station list from its JSON source. Any failure here is
    /// fatal to the caller: there is no sensible default station.
    pub fn from_json(raw: &[u8]) -> Result<Self, CatalogError> {
        let (stations, _consumed): (Vec<Station, MAX_STATIONS>, usize) =
            serde_json_core::from_slice(raw).map_err(|_| CatalogError::Parse)?;

        if stations.is_empty() {
            return Err(CatalogError::Empty);
        }
        if let Some(index) = stations.iter().position(|station| station.port == 0) {
            return Err(CatalogError::InvalidPort { index });
        }

        Ok(Self { stations })
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Station> {
        self.stations.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STATIONS: &[u8] = br#"[
        {"name": "Groove Salad", "host": "ice1.somafm.com", "port": 80, "path": "/groovesalad-128-mp3"},
        {"name": "Drone Zone", "host": "ice1.somafm.com", "port": 8000, "path": "/dronezone-128-mp3"}
    ]"#;

    #[test]
    fn parses_station_list_in_order() {
        let catalog = Catalog::from_json(TWO_STATIONS).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(0).unwrap().name.as_str(), "Groove Salad");
        assert_eq!(catalog.get(1).unwrap().port, 8000);
        assert!(catalog.get(2).is_none());
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(Catalog::from_json(b"[]"), Err(CatalogError::Empty)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            Catalog::from_json(b"{\"name\": \"not a list\"}"),
            Err(CatalogError::Parse)
        ));
        assert!(matches!(Catalog::from_json(b""), Err(CatalogError::Parse)));
    }

    #[test]
    fn missing_field_is_rejected() {
        let missing_path = br#"[{"name": "x", "host": "example.net", "port": 80}]"#;
        assert!(matches!(
            Catalog::from_json(missing_path),
            Err(CatalogError::Parse)
        ));
    }

    #[test]
    fn port_zero_is_rejected() {
        let raw = br#"[
            {"name": "ok", "host": "a.example", "port": 80, "path": "/a"},
            {"name": "bad", "host": "b.example", "port": 0, "path": "/b"}
        ]"#;
        assert!(matches!(
            Catalog::from_json(raw),
            Err(CatalogError::InvalidPort { index: 1 })
        ));
    }
}
