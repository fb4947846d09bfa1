use std::ops::Range;

use regex::Regex;

use crate::model::{Contact, ContactKind};
use crate::rules::CompiledRules;

const SENTINEL: char = '\u{0}';
const MIN_PHONE_DIGITS: usize = 6;
const MAX_PHONE_DIGITS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ContactHit {
    span: Range<usize>,
    kind: ContactKind,
    value: String,
}

/// Reduces a phone-like token to its national number: digits only, country
/// code and trunk zero dropped when they push it past nine digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > MAX_PHONE_DIGITS && digits.starts_with("51") {
        digits.replace_range(..2, "");
    }
    if digits.len() > MAX_PHONE_DIGITS && digits.starts_with('0') {
        digits.replace_range(..1, "");
    }
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS)
        .contains(&digits.len())
        .then_some(digits)
}

fn line_around(text: &str, at: usize) -> &str {
    let start = text[..at].rfind('\n').map_or(0, |pos| pos + 1);
    let end = text[at..].find('\n').map_or(text.len(), |pos| at + pos);
    &text[start..end]
}

fn contact_hits(rules: &CompiledRules, text: &str) -> Vec<ContactHit> {
    let mut hits = Vec::new();

    for pattern in &rules.phones {
        for captures in pattern.captures_iter(text) {
            let Some(found) = captures.get(1).or_else(|| captures.get(0)) else {
                continue;
            };
            let Some(value) = normalize_phone(found.as_str()) else {
                continue;
            };
            let kind = if rules.whatsapp_cue.is_match(line_around(text, found.start())) {
                ContactKind::Whatsapp
            } else {
                ContactKind::Phone
            };
            hits.push(ContactHit {
                span: found.range(),
                kind,
                value,
            });
        }
    }

    for found in rules.email.find_iter(text) {
        hits.push(ContactHit {
            span: found.range(),
            kind: ContactKind::Email,
            value: found.as_str().to_lowercase(),
        });
    }

    hits.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(b.span.end.cmp(&a.span.end))
    });

    let mut kept: Vec<ContactHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        if kept
            .last()
            .is_some_and(|last| hit.span.start < last.span.end)
        {
            continue;
        }
        kept.push(hit);
    }
    kept
}

/// Finds every phone, WhatsApp and e-mail contact in text order, without
/// duplicates. The first phone or WhatsApp number is primary, otherwise the
/// first e-mail.
pub fn find_contacts(rules: &CompiledRules, text: &str) -> Vec<Contact> {
    let mut contacts: Vec<Contact> = Vec::new();

    for hit in contact_hits(rules, text) {
        if let Some(existing) = contacts
            .iter_mut()
            .find(|contact| contact.value == hit.value)
        {
            if hit.kind == ContactKind::Whatsapp && existing.kind == ContactKind::Phone {
                existing.kind = ContactKind::Whatsapp;
            }
            continue;
        }
        contacts.push(Contact {
            kind: hit.kind,
            value: hit.value,
            is_primary: false,
        });
    }

    mark_primary(&mut contacts);
    contacts
}

pub fn mark_primary(contacts: &mut [Contact]) {
    let primary = contacts
        .iter()
        .position(|contact| contact.kind != ContactKind::Email)
        .or_else(|| (!contacts.is_empty()).then_some(0));

    for (index, contact) in contacts.iter_mut().enumerate() {
        contact.is_primary = Some(index) == primary;
    }
}

fn fuzzy_digits_pattern(value: &str) -> Option<Regex> {
    let digits: Vec<String> = value.chars().map(|ch| ch.to_string()).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return None;
    }
    Regex::new(&format!(r"\b{}\b", digits.join(r"[\s.\-()]*"))).ok()
}

fn replace_with_sentinel(text: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(text, SENTINEL.to_string().as_str())
        .into_owned()
}

/// Removes contact strings, and the labels that introduce them, from free
/// text. Known contact values are also removed when OCR spaced or
/// punctuated their digits differently.
pub fn strip_contacts(rules: &CompiledRules, text: &str, contacts: &[Contact]) -> String {
    let mut marked = String::with_capacity(text.len());
    let mut cursor = 0;
    for hit in contact_hits(rules, text) {
        marked.push_str(&text[cursor..hit.span.start]);
        marked.push(SENTINEL);
        cursor = hit.span.end;
    }
    marked.push_str(&text[cursor..]);

    for contact in contacts {
        let pattern = match contact.kind {
            ContactKind::Email => {
                Regex::new(&format!("(?i){}", regex::escape(&contact.value))).ok()
            }
            ContactKind::Phone | ContactKind::Whatsapp => fuzzy_digits_pattern(&contact.value),
        };
        if let Some(pattern) = pattern {
            marked = replace_with_sentinel(&marked, &pattern);
        }
    }

    let marked = rules.sentinel_run.replace_all(&marked, SENTINEL.to_string().as_str());
    let marked = rules.labelled_sentinel.replace_all(&marked, "");
    let marked = marked.replace(SENTINEL, " ");

    marked
        .split('\n')
        .map(|line| tidy_line(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapses inner whitespace and trims separators left dangling at the
/// line ends.
pub fn tidy_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|ch: char| matches!(ch, ',' | ';' | ':' | '/' | '-' | '|') || ch.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;

    fn rules() -> CompiledRules {
        CompiledRules::compile(&RuleSet::default()).unwrap()
    }

    #[test]
    fn normalize_phone_drops_country_code_and_trunk_zero() {
        assert_eq!(normalize_phone("+51 987 654 321").as_deref(), Some("987654321"));
        assert_eq!(normalize_phone("987-654-321").as_deref(), Some("987654321"));
        assert_eq!(normalize_phone("(084) 234567").as_deref(), Some("084234567"));
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn finds_phone_whatsapp_and_email_in_order() {
        let text = "Informes al correo Ventas@Ejemplo.pe\nWhatsApp 984 111 222\nCel: 987654321";
        let contacts = find_contacts(&rules(), text);

        assert_eq!(contacts.len(), 3);
        assert_eq!(contacts[0].kind, ContactKind::Email);
        assert_eq!(contacts[0].value, "ventas@ejemplo.pe");
        assert!(!contacts[0].is_primary);
        assert_eq!(contacts[1].kind, ContactKind::Whatsapp);
        assert_eq!(contacts[1].value, "984111222");
        assert!(contacts[1].is_primary);
        assert_eq!(contacts[2].kind, ContactKind::Phone);
    }

    #[test]
    fn email_is_primary_when_no_phone() {
        let contacts = find_contacts(&rules(), "escribir a info@hostal.com");
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].is_primary);
    }

    #[test]
    fn duplicate_numbers_are_reported_once() {
        let contacts = find_contacts(&rules(), "Cel 987654321 / 987 654 321");
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn labelled_landline_is_found() {
        let contacts = find_contacts(&rules(), "Telf: 234567 horario de oficina");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].value, "234567");
    }

    #[test]
    fn strip_contacts_removes_labels_and_numbers() {
        let r = rules();
        let text = "Casa amplia con jardín.\nRazón Cel: 987654321 / 984 111 222\nescribir a ventas@casa.pe";
        let contacts = find_contacts(&r, text);
        let cleaned = strip_contacts(&r, text, &contacts);

        assert_eq!(cleaned, "Casa amplia con jardín.\nescribir a");
        assert!(!cleaned.contains("987654321"));
    }

    #[test]
    fn strip_contacts_handles_spaced_digits() {
        let r = rules();
        let contacts = vec![Contact {
            kind: ContactKind::Phone,
            value: "987654321".to_string(),
            is_primary: true,
        }];
        let cleaned = strip_contacts(&r, "Llamar al 98 76 54 321 urgente", &contacts);
        assert_eq!(cleaned, "urgente");
    }
}
