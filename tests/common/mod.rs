//! Fixture databases shared by the integration tests

#![allow(dead_code)]

use geoscope::{DataValue, Edition, EngineConfig, GeoDatabaseBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn map(pairs: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<HashMap<_, _>>(),
    )
}

pub fn s(v: &str) -> DataValue {
    DataValue::String(v.to_string())
}

fn names(en: &str) -> DataValue {
    map(vec![("en", s(en))])
}

struct Place {
    network: &'static str,
    country: (&'static str, &'static str),
    continent: (&'static str, &'static str),
    city: Option<&'static str>,
    location: (f64, f64, u16, &'static str),
    asn: (u32, &'static str),
}

const PLACES: &[Place] = &[
    Place {
        network: "8.8.8.0/24",
        country: ("US", "United States"),
        continent: ("NA", "North America"),
        city: None,
        location: (37.751, -97.822, 1000, "America/Chicago"),
        asn: (15169, "GOOGLE"),
    },
    Place {
        network: "1.1.1.0/24",
        country: ("AU", "Australia"),
        continent: ("OC", "Oceania"),
        city: Some("Sydney"),
        location: (-33.494, 143.2104, 1000, "Australia/Sydney"),
        asn: (13335, "CLOUDFLARENET"),
    },
    Place {
        network: "2001:4860::/32",
        country: ("US", "United States"),
        continent: ("NA", "North America"),
        city: None,
        location: (37.751, -97.822, 100, "America/Chicago"),
        asn: (15169, "GOOGLE"),
    },
];

fn country_data(place: &Place, country_name: &str) -> Vec<(&'static str, DataValue)> {
    vec![
        (
            "country",
            map(vec![("iso_code", s(place.country.0)), ("names", names(country_name))]),
        ),
        (
            "continent",
            map(vec![("code", s(place.continent.0)), ("names", names(place.continent.1))]),
        ),
    ]
}

/// Bytes of one fixture edition
pub fn edition_bytes(edition: Edition) -> Vec<u8> {
    build_edition(edition, None)
}

/// Bytes of one fixture edition with `GEN{stamp}` written into the country
/// name, city name, time zone and ASN organization of every network
///
/// Stamped City editions carry no country data for networks without a city,
/// so a lookup there merges fields from all three editions.
pub fn stamped_edition_bytes(edition: Edition, stamp: u32) -> Vec<u8> {
    build_edition(edition, Some(format!("GEN{}", stamp)))
}

fn build_edition(edition: Edition, stamp: Option<String>) -> Vec<u8> {
    let database_type = match edition {
        Edition::Country => "GeoLite2-Country",
        Edition::City => "GeoLite2-City",
        Edition::Asn => "GeoLite2-ASN",
    };
    let mut builder = GeoDatabaseBuilder::new(database_type)
        .with_description("en", format!("{} test fixture", database_type))
        .with_languages(["en"]);
    let stamped = |value: &str| stamp.clone().unwrap_or_else(|| value.to_string());

    for place in PLACES {
        let data = match edition {
            Edition::Country => map(country_data(place, &stamped(place.country.1))),
            Edition::City => {
                let (lat, lon, radius, tz) = place.location;
                let mut fields = if stamp.is_some() && place.city.is_none() {
                    Vec::new()
                } else {
                    country_data(place, &stamped(place.country.1))
                };
                fields.push((
                    "location",
                    map(vec![
                        ("latitude", DataValue::Double(lat)),
                        ("longitude", DataValue::Double(lon)),
                        ("accuracy_radius", DataValue::Uint16(radius)),
                        ("time_zone", s(&stamped(tz))),
                    ]),
                ));
                if let Some(city) = place.city {
                    fields.push(("city", map(vec![("names", names(&stamped(city)))])));
                }
                map(fields)
            }
            Edition::Asn => map(vec![
                ("autonomous_system_number", DataValue::Uint32(place.asn.0)),
                ("autonomous_system_organization", s(&stamped(place.asn.1))),
            ]),
        };
        builder.add_network(place.network, data).unwrap();
    }
    builder.build().unwrap()
}

/// Write one fixture edition under its default file name
pub fn write_edition(dir: &Path, edition: Edition) -> PathBuf {
    let path = dir.join(edition.default_file_name());
    std::fs::write(&path, edition_bytes(edition)).unwrap();
    path
}

/// Write all three fixture editions
pub fn write_all(dir: &Path) {
    for edition in Edition::ALL {
        write_edition(dir, edition);
    }
}

/// Engine configuration for `dir` with the scheduler disabled
pub fn quiet_config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default().with_data_dir(dir);
    config.reload_interval_secs = 0;
    config.watch = false;
    config
}

/// Replace all three editions with copies stamped `GEN{stamp}` by writing
/// a temporary file and renaming it over the old one, the way database
/// updaters swap files
pub fn replace_all(dir: &Path, stamp: u32) {
    for edition in Edition::ALL {
        let tmp = dir.join(format!("{}.tmp", edition.default_file_name()));
        std::fs::write(&tmp, stamped_edition_bytes(edition, stamp)).unwrap();
        std::fs::rename(&tmp, dir.join(edition.default_file_name())).unwrap();
    }
}
