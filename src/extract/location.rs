use super::fold_text;
use crate::model::{Location, StructuredLocation};
use crate::rules::{CompiledRules, District};

/// Longest street, urbanization, building or block/lot reference.
pub fn find_landmark(rules: &CompiledRules, text: &str) -> Option<String> {
    rules
        .landmarks
        .iter()
        .flat_map(|pattern| pattern.find_iter(text))
        .map(|found| {
            found
                .as_str()
                .trim()
                .trim_end_matches([',', ';', ':'])
                .to_string()
        })
        .max_by_key(|landmark| landmark.chars().count())
}

/// First gazetteer district (in table order) mentioned in `text`.
pub fn find_district<'r>(rules: &'r CompiledRules, text: &str) -> Option<&'r District> {
    let haystack = format!(" {} ", fold_text(text));
    rules
        .districts
        .iter()
        .find(|entry| {
            entry
                .folded_variants
                .iter()
                .any(|variant| haystack.contains(&format!(" {variant} ")))
        })
        .map(|entry| &entry.district)
}

/// Best-effort location: a known district yields a structured location
/// (carrying any landmark as the address); a bare landmark is anchored to
/// the default region; otherwise the default region text alone.
pub fn parse_location(rules: &CompiledRules, text: &str) -> Location {
    let landmark = find_landmark(rules, text);

    match (find_district(rules, text), landmark) {
        (Some(district), address) => Location::Structured(StructuredLocation {
            country: rules.country.clone(),
            region: district.region.clone(),
            province: district.province.clone(),
            district: district.name.clone(),
            address,
            lat: Some(district.lat),
            lon: Some(district.lon),
        }),
        (None, Some(address)) => Location::Text {
            text: format!("{address}, {}", rules.default_region_text),
        },
        (None, None) => Location::Text {
            text: rules.default_region_text.clone(),
        },
    }
}
