//! Response records and field extraction from GeoLite2 data

use crate::data_section::DataValue;
use serde::Serialize;
use std::net::IpAddr;

/// Merged geolocation answer for one address
///
/// Fields a source did not provide are `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRecord {
    /// The address that was looked up
    pub ip: IpAddr,
    /// ISO 3166-1 alpha-2 country code
    pub country_code: Option<String>,
    /// Localized country name
    pub country_name: Option<String>,
    /// ISO 3166-2 code of the first subdivision
    pub subdivision_code: Option<String>,
    /// Localized name of the first subdivision
    pub subdivision_name: Option<String>,
    /// Localized city name
    pub city_name: Option<String>,
    /// Postal code
    pub postal_code: Option<String>,
    /// Approximate latitude
    pub latitude: Option<f64>,
    /// Approximate longitude
    pub longitude: Option<f64>,
    /// Radius in kilometers around the coordinates
    pub accuracy_radius: Option<u16>,
    /// IANA time zone
    pub timezone: Option<String>,
    /// Two-letter continent code
    pub continent_code: Option<String>,
    /// Localized continent name
    pub continent_name: Option<String>,
    /// Whether the country is an EU member
    #[serde(rename = "is_in_european_union")]
    pub is_in_eu: Option<bool>,
    /// Autonomous system number
    pub asn: Option<u32>,
    /// Autonomous system organization
    pub asn_org: Option<String>,
}

impl GeoRecord {
    /// A record with every field unresolved
    pub fn empty(ip: IpAddr) -> Self {
        Self {
            ip,
            country_code: None,
            country_name: None,
            subdivision_code: None,
            subdivision_name: None,
            city_name: None,
            postal_code: None,
            latitude: None,
            longitude: None,
            accuracy_radius: None,
            timezone: None,
            continent_code: None,
            continent_name: None,
            is_in_eu: None,
            asn: None,
            asn_org: None,
        }
    }

    /// True when country-level fields are resolved
    pub fn has_country(&self) -> bool {
        self.country_code.is_some()
    }

    /// Fill every field a City record carries
    pub(crate) fn apply_city(&mut self, data: &DataValue, locales: &[String]) {
        self.apply_country(data, locales);

        if let Some(subdivision) = data
            .get("subdivisions")
            .and_then(DataValue::as_array)
            .and_then(|subdivisions| subdivisions.first())
        {
            fill(&mut self.subdivision_code, string(subdivision.get("iso_code")));
            fill(&mut self.subdivision_name, localized_name(subdivision, locales));
        }
        if let Some(city) = data.get("city") {
            fill(&mut self.city_name, localized_name(city, locales));
        }
        fill(&mut self.postal_code, string(data.get_path(&["postal", "code"])));

        if let Some(location) = data.get("location") {
            fill(&mut self.latitude, location.get("latitude").and_then(DataValue::as_f64));
            fill(&mut self.longitude, location.get("longitude").and_then(DataValue::as_f64));
            fill(
                &mut self.accuracy_radius,
                location
                    .get("accuracy_radius")
                    .and_then(DataValue::as_u64)
                    .and_then(|r| u16::try_from(r).ok()),
            );
            fill(&mut self.timezone, string(location.get("time_zone")));
        }
    }

    /// Fill country, continent and EU membership; fields already set win
    pub(crate) fn apply_country(&mut self, data: &DataValue, locales: &[String]) {
        if let Some(country) = data.get("country") {
            fill(&mut self.country_code, string(country.get("iso_code")));
            fill(&mut self.country_name, localized_name(country, locales));
            // The flag is only stored for member states
            fill(
                &mut self.is_in_eu,
                Some(
                    country
                        .get("is_in_european_union")
                        .and_then(DataValue::as_bool)
                        .unwrap_or(false),
                ),
            );
        }
        if let Some(continent) = data.get("continent") {
            fill(&mut self.continent_code, string(continent.get("code")));
            fill(&mut self.continent_name, localized_name(continent, locales));
        }
    }

    /// Fill the ASN fields
    pub(crate) fn apply_asn(&mut self, data: &DataValue) {
        let (asn, org) = asn_fields(data);
        fill(&mut self.asn, asn);
        fill(&mut self.asn_org, org);
    }
}

/// Network containing an address, from the ASN edition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    /// The address that was looked up
    pub ip: IpAddr,
    /// Enclosing network in CIDR notation, host bits cleared
    pub network: String,
    /// Prefix length of `network`
    pub prefix_len: u8,
    /// Autonomous system number
    pub asn: Option<u32>,
    /// Autonomous system organization
    pub asn_org: Option<String>,
}

pub(crate) fn asn_fields(data: &DataValue) -> (Option<u32>, Option<String>) {
    let asn = data
        .get("autonomous_system_number")
        .and_then(DataValue::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    let org = string(data.get("autonomous_system_organization"));
    (asn, org)
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn string(value: Option<&DataValue>) -> Option<String> {
    value.and_then(DataValue::as_str).map(str::to_string)
}

/// First of `locales` present in the entity's `names` map
fn localized_name(entity: &DataValue, locales: &[String]) -> Option<String> {
    let names = entity.get("names")?;
    locales
        .iter()
        .find_map(|locale| names.get(locale).and_then(DataValue::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn map(pairs: Vec<(&str, DataValue)>) -> DataValue {
        DataValue::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn s(v: &str) -> DataValue {
        DataValue::String(v.to_string())
    }

    fn en() -> Vec<String> {
        vec!["en".to_string()]
    }

    fn city_record() -> DataValue {
        map(vec![
            ("city", map(vec![("names", map(vec![("en", s("Munich")), ("de", s("München"))]))])),
            ("continent", map(vec![("code", s("EU")), ("names", map(vec![("en", s("Europe"))]))])),
            (
                "country",
                map(vec![
                    ("iso_code", s("DE")),
                    ("is_in_european_union", DataValue::Bool(true)),
                    ("names", map(vec![("en", s("Germany")), ("de", s("Deutschland"))])),
                ]),
            ),
            (
                "location",
                map(vec![
                    ("latitude", DataValue::Double(48.1374)),
                    ("longitude", DataValue::Double(11.5755)),
                    ("accuracy_radius", DataValue::Uint16(20)),
                    ("time_zone", s("Europe/Berlin")),
                ]),
            ),
            ("postal", map(vec![("code", s("80331"))])),
            (
                "subdivisions",
                DataValue::Array(vec![map(vec![
                    ("iso_code", s("BY")),
                    ("names", map(vec![("en", s("Bavaria")), ("de", s("Bayern"))])),
                ])]),
            ),
        ])
    }

    #[test]
    fn test_city_fields() {
        let mut record = GeoRecord::empty("81.0.0.1".parse().unwrap());
        record.apply_city(&city_record(), &en());

        assert_eq!(record.country_code.as_deref(), Some("DE"));
        assert_eq!(record.country_name.as_deref(), Some("Germany"));
        assert_eq!(record.subdivision_code.as_deref(), Some("BY"));
        assert_eq!(record.subdivision_name.as_deref(), Some("Bavaria"));
        assert_eq!(record.city_name.as_deref(), Some("Munich"));
        assert_eq!(record.postal_code.as_deref(), Some("80331"));
        assert_eq!(record.latitude, Some(48.1374));
        assert_eq!(record.accuracy_radius, Some(20));
        assert_eq!(record.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(record.continent_code.as_deref(), Some("EU"));
        assert_eq!(record.is_in_eu, Some(true));
        assert!(record.asn.is_none());
    }

    #[test]
    fn test_locale_preference() {
        let mut record = GeoRecord::empty("81.0.0.1".parse().unwrap());
        let locales = vec!["fr".to_string(), "de".to_string(), "en".to_string()];
        record.apply_city(&city_record(), &locales);
        assert_eq!(record.city_name.as_deref(), Some("München"));
        // Europe only has an English name
        assert_eq!(record.continent_name.as_deref(), Some("Europe"));
    }

    #[test]
    fn test_eu_flag_defaults_false() {
        let mut record = GeoRecord::empty("8.8.8.8".parse().unwrap());
        record.apply_country(&map(vec![("country", map(vec![("iso_code", s("US"))]))]), &en());
        assert_eq!(record.is_in_eu, Some(false));

        let mut bare = GeoRecord::empty("8.8.8.8".parse().unwrap());
        bare.apply_country(&map(vec![]), &en());
        assert_eq!(bare.is_in_eu, None);
    }

    #[test]
    fn test_existing_fields_win() {
        let mut record = GeoRecord::empty("81.0.0.1".parse().unwrap());
        record.apply_city(&city_record(), &en());
        record.apply_country(&map(vec![("country", map(vec![("iso_code", s("FR"))]))]), &en());
        assert_eq!(record.country_code.as_deref(), Some("DE"));
    }

    #[test]
    fn test_serialized_field_names() {
        let mut record = GeoRecord::empty("1.1.1.1".parse().unwrap());
        record.apply_asn(&map(vec![
            ("autonomous_system_number", DataValue::Uint32(13335)),
            ("autonomous_system_organization", s("CLOUDFLARENET")),
        ]));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ip"], "1.1.1.1");
        assert_eq!(json["asn"], 13335);
        assert_eq!(json["asn_org"], "CLOUDFLARENET");
        assert!(json["is_in_european_union"].is_null());
        assert!(json["country_code"].is_null());
        assert!(json.get("is_in_eu").is_none());
    }
}
