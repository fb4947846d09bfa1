//! Pure text stages: boilerplate removal, ad segmentation, field extraction,
//! classification and record validation.

use chrono::NaiveDate;
use deunicode::deunicode;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::ClassifiedAd;
use crate::rules::CompiledRules;
use crate::util::sha256_text;

pub mod boundaries;
pub mod classify;
pub mod contacts;
pub mod fields;
pub mod location;
pub mod noise;
pub mod normalize;

use classify::classify;
use fields::extract;
use normalize::{AdCandidate, normalize_and_validate};

const AD_NAMESPACE: Uuid = Uuid::from_u128(0x5c1e_0f4a_9d2b_4e71_8a63_2f0d_b7c4_1e90);

/// Folds text for keyword comparison: transliterated to ASCII, lower-cased,
/// punctuation replaced by single spaces. Words are transliterated one at a
/// time because `deunicode` drops line breaks.
pub fn fold_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for raw in text.split_whitespace() {
        let folded = deunicode(raw).to_lowercase();
        for word in folded.split(|ch: char| !ch.is_ascii_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

/// Stable identifier for an ad block, so reprocessing a source unit upserts
/// onto the same keys.
pub fn ad_id(edition_id: &str, page: u32, ordinal: usize, block_text: &str) -> Uuid {
    let key = format!(
        "{edition_id}:{page}:{ordinal}:{}",
        sha256_text(block_text)
    );
    Uuid::new_v5(&AD_NAMESPACE, key.as_bytes())
}

#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub edition_id: &'a str,
    pub page: u32,
    pub published_at: NaiveDate,
}

#[derive(Debug, Default)]
pub struct PageExtraction {
    pub ads: Vec<ClassifiedAd>,
    pub boilerplate_removed: usize,
    pub rows_seen: usize,
    pub noise_dropped: usize,
    pub ads_extracted: usize,
    pub rejected: usize,
    pub rejections: Vec<String>,
}

impl PageExtraction {
    pub fn absorb(&mut self, other: PageExtraction) {
        self.ads.extend(other.ads);
        self.boilerplate_removed += other.boilerplate_removed;
        self.rows_seen += other.rows_seen;
        self.noise_dropped += other.noise_dropped;
        self.ads_extracted += other.ads_extracted;
        self.rejected += other.rejected;
        self.rejections.extend(other.rejections);
    }
}

/// Runs every extraction stage over one page of OCR text.
pub fn extract_page(rules: &CompiledRules, ctx: &PageContext<'_>, raw_text: &str) -> PageExtraction {
    let filtered = noise::filter(rules, raw_text);
    let split = boundaries::split_blocks(rules, &filtered.text);

    let mut out = PageExtraction {
        boilerplate_removed: filtered.removed,
        rows_seen: split.candidates,
        noise_dropped: split.dropped,
        ..PageExtraction::default()
    };

    for block in split.blocks {
        let fields = match extract(rules, &block.text) {
            Ok(fields) => fields,
            Err(reject) => {
                out.noise_dropped += 1;
                debug!(
                    edition = ctx.edition_id,
                    page = ctx.page,
                    block = block.ordinal,
                    lines = ?block.lines,
                    reason = %reject,
                    "dropped block"
                );
                continue;
            }
        };
        out.ads_extracted += 1;

        let classification = classify(
            rules,
            &fields.title,
            &fields.description,
            Some(ctx.page),
            Some(ctx.edition_id),
        );
        if classification.from_page_prior {
            debug!(
                edition = ctx.edition_id,
                page = ctx.page,
                category = %classification.category,
                "category taken from page prior"
            );
        }
        let title = fields.title.clone();
        let candidate = AdCandidate {
            id: ad_id(ctx.edition_id, ctx.page, block.ordinal, &block.text),
            fields,
            category: classification.category,
            size_tier: classification.size_tier,
            source_edition: ctx.edition_id.to_string(),
            source_page: ctx.page,
        };

        match normalize_and_validate(rules, candidate, ctx.published_at) {
            Ok(ad) => out.ads.push(ad),
            Err(err) => {
                out.rejected += 1;
                warn!(
                    edition = ctx.edition_id,
                    page = ctx.page,
                    block = block.ordinal,
                    title = %title,
                    reason = %err,
                    "rejected ad"
                );
                out.rejections.push(format!(
                    "{}:p{}:b{}: {err} ({title})",
                    ctx.edition_id, ctx.page, block.ordinal
                ));
            }
        }
    }

    out
}
