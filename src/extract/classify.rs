use super::fold_text;
use crate::model::{Category, SizeTier};
use crate::rules::CompiledRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub size_tier: SizeTier,
    pub from_page_prior: bool,
}

/// Number of distinct keywords of each category present in `text`, in rule
/// table order.
pub fn category_scores(rules: &CompiledRules, text: &str) -> Vec<(Category, usize)> {
    let haystack = format!(" {} ", fold_text(text));
    rules
        .categories
        .iter()
        .map(|entry| {
            let score = entry
                .keywords
                .iter()
                .filter(|keyword| haystack.contains(&format!(" {keyword} ")))
                .count();
            (entry.category, score)
        })
        .collect()
}

/// Highest score wins; ties go to the category listed first. With no
/// keyword hits at all the rule set's default category applies.
pub fn best_category(rules: &CompiledRules, scores: &[(Category, usize)]) -> Category {
    let mut best: Option<(Category, usize)> = None;
    for (category, score) in scores {
        if *score == 0 {
            continue;
        }
        if best.is_none_or(|(_, top)| *score > top) {
            best = Some((*category, *score));
        }
    }
    best.map_or(rules.default_category, |(category, _)| category)
}

pub fn size_tier(rules: &CompiledRules, title: &str, description: &str) -> SizeTier {
    let length = title.chars().count() + description.chars().count();
    rules
        .size_breakpoints
        .iter()
        .find(|breakpoint| length > breakpoint.above_chars)
        .map_or(rules.size_floor, |breakpoint| breakpoint.tier)
}

pub fn classify(
    rules: &CompiledRules,
    title: &str,
    description: &str,
    source_page: Option<u32>,
    edition: Option<&str>,
) -> Classification {
    let scores = category_scores(rules, &format!("{title} {description}"));
    let size_tier = size_tier(rules, title, description);

    if let Some(page) = source_page {
        let prior = rules.page_priors.iter().find(|prior| {
            prior.covers(edition, page)
                && scores
                    .iter()
                    .any(|(category, score)| *category == prior.category && *score > 0)
        });
        if let Some(prior) = prior {
            return Classification {
                category: prior.category,
                size_tier,
                from_page_prior: true,
            };
        }
    }

    Classification {
        category: best_category(rules, &scores),
        size_tier,
        from_page_prior: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PagePrior, RuleSet};

    fn rules() -> CompiledRules {
        CompiledRules::compile(&RuleSet::default()).unwrap()
    }

    fn rules_with_prior() -> CompiledRules {
        let mut set = RuleSet::default();
        set.page_priors.push(PagePrior {
            edition: None,
            first_page: 2,
            last_page: 6,
            category: Category::RealEstate,
        });
        CompiledRules::compile(&set).unwrap()
    }

    #[test]
    fn keyword_scoring_ignores_case_and_accents() {
        let result = classify(
            &rules(),
            "VENDO CAMIONETA TOYOTA",
            "Vehículo en buen estado, placa nueva",
            None,
            None,
        );
        assert_eq!(result.category, Category::Vehicles);
        assert!(!result.from_page_prior);
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let scores = category_scores(&rules(), "casa casa casa casa");
        let real_estate = scores
            .iter()
            .find(|(category, _)| *category == Category::RealEstate)
            .unwrap();
        assert_eq!(real_estate.1, 1);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let scores = category_scores(&rules(), "casamiento autorizado");
        assert!(scores.iter().all(|(_, score)| *score == 0));
    }

    #[test]
    fn no_keywords_falls_back_to_default() {
        let result = classify(&rules(), "xyz", "qwerty asdf", None, None);
        assert_eq!(result.category, Category::Services);
    }

    #[test]
    fn ties_follow_table_order() {
        // "trabajo" (jobs) and "casa" (real estate) score one each.
        let result = classify(&rules(), "trabajo", "casa", None, None);
        assert_eq!(result.category, Category::Jobs);
    }

    #[test]
    fn page_prior_needs_a_consistent_keyword() {
        let r = rules_with_prior();

        let with_keyword = classify(&r, "OCASIÓN", "vendo auto toyota y también un terreno", Some(3), None);
        assert_eq!(with_keyword.category, Category::RealEstate);
        assert!(with_keyword.from_page_prior);

        let without_keyword = classify(&r, "OCASIÓN", "vendo auto toyota con placa", Some(3), None);
        assert_eq!(without_keyword.category, Category::Vehicles);
        assert!(!without_keyword.from_page_prior);

        let outside_range = classify(&r, "OCASIÓN", "vendo auto toyota y también un terreno", Some(9), None);
        assert_eq!(outside_range.category, Category::Vehicles);
    }

    #[test]
    fn size_tier_breakpoints() {
        let r = rules();
        assert_eq!(size_tier(&r, "t", "short"), SizeTier::Small);
        assert_eq!(size_tier(&r, "", &"a".repeat(401)), SizeTier::Medium);
        assert_eq!(size_tier(&r, "", &"a".repeat(701)), SizeTier::Large);
        assert_eq!(size_tier(&r, "", &"a".repeat(1201)), SizeTier::Huge);
        assert_eq!(size_tier(&r, "", &"a".repeat(400)), SizeTier::Small);
    }
}
