use thiserror::Error;

use super::boundaries::{is_contact_line, is_opening_line, is_title_line};
use super::contacts::{find_contacts, strip_contacts, tidy_line};
use crate::model::Contact;
use crate::rules::CompiledRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Reject {
    #[error("block carries no phone, whatsapp or e-mail contact")]
    NoContacts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub title: String,
    pub description: String,
    pub contacts: Vec<Contact>,
    pub raw_location_text: String,
    pub raw_price_text: Option<String>,
}

/// Pulls title, description, contacts and raw location/price text out of
/// one ad block. Blocks without any contact are not ads.
pub fn extract(rules: &CompiledRules, block: &str) -> Result<ExtractedFields, Reject> {
    let contacts = find_contacts(rules, block);
    if contacts.is_empty() {
        return Err(Reject::NoContacts);
    }

    let lines: Vec<&str> = block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let (title_line, rest) = match choose_title_line(rules, &lines) {
        Some(index) => (lines[index].to_string(), lines[index + 1..].join("\n")),
        None => fallback_title(rules, &lines),
    };
    let title = strip_contacts(rules, &title_line, &contacts).replace('\n', " ");

    let description = strip_contacts(rules, &rest, &contacts)
        .lines()
        .collect::<Vec<_>>()
        .join(" ");

    Ok(ExtractedFields {
        title: tidy_line(&title),
        description,
        contacts,
        raw_location_text: lines.join("\n"),
        raw_price_text: rules
            .price
            .find(block)
            .map(|found| found.as_str().trim().to_string()),
    })
}

fn is_trivial(rules: &CompiledRules, line: &str) -> bool {
    line.chars().filter(|ch| ch.is_alphabetic()).count() < 3
        || rules.bare_amount.is_match(line)
        || is_contact_line(rules, line)
}

fn choose_title_line(rules: &CompiledRules, lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .take(rules.title_scan_lines)
        .position(|line| {
            (is_title_line(rules, line) || is_opening_line(rules, line))
                && !is_trivial(rules, line)
        })
        .or_else(|| lines.iter().position(|line| !is_trivial(rules, line)))
}

/// Last resort: the first few words of the block become the title.
fn fallback_title(rules: &CompiledRules, lines: &[&str]) -> (String, String) {
    let joined = lines.join(" ");
    let words: Vec<&str> = joined.split_whitespace().collect();
    let cut = rules.fallback_title_words.min(words.len());
    (words[..cut].join(" "), words[cut..].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContactKind;
    use crate::rules::RuleSet;

    fn rules() -> CompiledRules {
        CompiledRules::compile(&RuleSet::default()).unwrap()
    }

    #[test]
    fn picks_uppercase_title_and_strips_contacts() {
        let fields = extract(
            &rules(),
            "AVISO EN MAYÚSCULAS\nDescripción de prueba larga.\nCel: 987654321",
        )
        .unwrap();

        assert_eq!(fields.title, "AVISO EN MAYÚSCULAS");
        assert_eq!(fields.description, "Descripción de prueba larga.");
        assert_eq!(fields.contacts.len(), 1);
        assert_eq!(fields.contacts[0].kind, ContactKind::Phone);
        assert!(fields.contacts[0].is_primary);
    }

    #[test]
    fn opening_phrase_line_can_be_title() {
        let fields = extract(
            &rules(),
            "S/. 35,000\nSe vende terreno en Poroy\n300 m2 con agua y luz\nRazón 984222333",
        )
        .unwrap();
        assert_eq!(fields.title, "Se vende terreno en Poroy");
        assert_eq!(fields.description, "300 m2 con agua y luz");
        assert_eq!(fields.raw_price_text.as_deref(), Some("S/. 35,000"));
    }

    #[test]
    fn falls_back_to_first_non_trivial_line() {
        let fields = extract(
            &rules(),
            "Cel 987654321\nclases de matemática para escolares\ntodos los niveles",
        )
        .unwrap();
        assert_eq!(fields.title, "clases de matemática para escolares");
        assert_eq!(fields.description, "todos los niveles");
    }

    #[test]
    fn falls_back_to_leading_words() {
        let fields = extract(&rules(), "987654321 ok").unwrap();
        assert_eq!(fields.title, "ok");
        assert!(fields.description.is_empty());
    }

    #[test]
    fn block_without_contact_is_rejected() {
        let result = extract(
            &rules(),
            "EDITORIAL DE LA SEMANA\nLa feria regional se realizará en la plaza principal",
        );
        assert_eq!(result.unwrap_err(), Reject::NoContacts);
    }
}
