use chrono::{Days, NaiveDate};
use thiserror::Error;
use uuid::Uuid;

use super::contacts::{mark_primary, strip_contacts};
use super::fields::ExtractedFields;
use super::location::parse_location;
use crate::model::{Category, ClassifiedAd, SizeTier};
use crate::rules::CompiledRules;

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 2000;
pub const TITLE_MIN_CHARS: usize = 3;
pub const DESCRIPTION_MIN_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title shorter than 3 characters")]
    TitleTooShort,
    #[error("description shorter than 10 characters")]
    DescriptionTooShort,
    #[error("ad has no contacts")]
    NoContacts,
    #[error("expiration date out of range for {published_at} + {days} days")]
    ExpiryOutOfRange { published_at: NaiveDate, days: u64 },
}

/// Extracted and classified fields waiting for validation.
#[derive(Debug, Clone)]
pub struct AdCandidate {
    pub id: Uuid,
    pub fields: ExtractedFields,
    pub category: Category,
    pub size_tier: SizeTier,
    pub source_edition: String,
    pub source_page: u32,
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

pub fn expires_at(published_at: NaiveDate, tier: SizeTier) -> Option<NaiveDate> {
    published_at.checked_add_days(Days::new(tier.expiry_days()))
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans and bounds a candidate, rejecting it when it cannot satisfy the
/// record invariants. Historic imports always come out inactive.
pub fn normalize_and_validate(
    rules: &CompiledRules,
    candidate: AdCandidate,
    published_at: NaiveDate,
) -> Result<ClassifiedAd, ValidationError> {
    let AdCandidate {
        id,
        fields,
        category,
        size_tier,
        source_edition,
        source_page,
    } = candidate;

    let mut contacts = fields.contacts;
    if contacts.is_empty() {
        return Err(ValidationError::NoContacts);
    }
    mark_primary(&mut contacts);

    let title = truncate_chars(&single_line(&fields.title), TITLE_MAX_CHARS);
    let description = truncate_chars(
        &single_line(&strip_contacts(rules, &fields.description, &contacts)),
        DESCRIPTION_MAX_CHARS,
    );

    if title.chars().count() < TITLE_MIN_CHARS {
        return Err(ValidationError::TitleTooShort);
    }
    if description.chars().count() < DESCRIPTION_MIN_CHARS {
        return Err(ValidationError::DescriptionTooShort);
    }

    let expires_at =
        expires_at(published_at, size_tier).ok_or(ValidationError::ExpiryOutOfRange {
            published_at,
            days: size_tier.expiry_days(),
        })?;

    Ok(ClassifiedAd {
        id,
        category,
        title,
        description,
        contacts,
        location: parse_location(rules, &fields.raw_location_text),
        size_tier,
        price_text: fields.raw_price_text,
        published_at,
        expires_at,
        source_edition,
        source_page,
        is_historic: true,
        is_active: false,
    })
}
