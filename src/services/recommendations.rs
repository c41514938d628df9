//! Scores candidate products against an auto-gifting rule.
//!
//! Pure and synchronous: the caller supplies the candidates, this module
//! only filters, scores, ranks and decides whether a human must approve.

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

const BASE_SCORE: f64 = 0.3;
const CATEGORY_WEIGHT: f64 = 0.2;
const AGE_WEIGHT: f64 = 0.15;
const RELATIONSHIP_WEIGHT: f64 = 0.1;
/// Candidates above this share of the adjusted budget are dropped.
const OVER_BUDGET_CUTOFF: Decimal = dec!(1.2);

const BLOCKED_KEYWORDS: &[&str] = &["explicit", "nsfw", "firearm", "ammunition", "tobacco", "vape"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Relationship {
    Spouse,
    Partner,
    Family,
    Friend,
    Colleague,
    Other,
}

impl Relationship {
    pub fn budget_multiplier(&self) -> Decimal {
        match self {
            Relationship::Spouse | Relationship::Partner => dec!(1.5),
            Relationship::Family => dec!(1.2),
            Relationship::Friend | Relationship::Other => dec!(1.0),
            Relationship::Colleague => dec!(0.8),
        }
    }

    fn suited_categories(&self) -> &'static [&'static str] {
        match self {
            Relationship::Spouse | Relationship::Partner => &["jewelry", "romantic", "spa", "experience"],
            Relationship::Family => &["home", "kitchen", "photo", "personalized"],
            Relationship::Friend => &["games", "books", "gadgets", "fun"],
            Relationship::Colleague => &["office", "desk", "coffee", "books"],
            Relationship::Other => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgeBucket {
    Child,
    Teen,
    YoungAdult,
    Adult,
    Senior,
}

impl AgeBucket {
    pub fn for_age(age: i32) -> Self {
        match age {
            i32::MIN..=12 => AgeBucket::Child,
            13..=19 => AgeBucket::Teen,
            20..=34 => AgeBucket::YoungAdult,
            35..=59 => AgeBucket::Adult,
            _ => AgeBucket::Senior,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            AgeBucket::Child => &["toys", "kids", "educational", "games"],
            AgeBucket::Teen => &["gaming", "tech", "fashion", "music"],
            AgeBucket::YoungAdult => &["tech", "fitness", "travel", "gadgets"],
            AgeBucket::Adult => &["home", "kitchen", "books", "wellness"],
            AgeBucket::Senior => &["garden", "books", "comfort", "photo"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftingRule {
    pub budget_limit: Decimal,
    pub relationship: Relationship,
    #[serde(default)]
    pub preferred_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GiftEvent {
    #[validate(length(min = 1))]
    pub occasion: String,
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub recipient_birth_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProduct {
    pub product_id: String,
    pub title: String,
    pub price: Decimal,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Set upstream by catalog moderation.
    #[serde(default)]
    pub inappropriate: bool,
}

impl CandidateProduct {
    fn haystack(&self) -> String {
        let mut text = self.title.to_lowercase();
        for c in &self.categories {
            text.push(' ');
            text.push_str(&c.to_lowercase());
        }
        text
    }

    fn is_blocked(&self) -> bool {
        self.inappropriate || {
            let text = self.haystack();
            BLOCKED_KEYWORDS.iter().any(|k| text.contains(k))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecommendationSettings {
    /// Totals above this always need a human.
    pub approval_threshold: Decimal,
    pub max_results: usize,
    /// Approval is due this long before the event.
    pub approval_lead: Duration,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            approval_threshold: dec!(100.00),
            max_results: 5,
            approval_lead: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredProduct {
    pub product: CandidateProduct,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationSet {
    pub adjusted_budget: Decimal,
    pub recommendations: Vec<ScoredProduct>,
    /// Price of the top pick; zero when nothing qualified.
    pub total: Decimal,
    pub requires_approval: bool,
    pub approval_deadline: Option<DateTime<Utc>>,
}

pub fn adjusted_budget(rule: &GiftingRule) -> Decimal {
    (rule.budget_limit * rule.relationship.budget_multiplier()).round_dp(2)
}

fn score(
    product: &CandidateProduct,
    rule: &GiftingRule,
    budget: Decimal,
    age_bucket: Option<AgeBucket>,
) -> ScoredProduct {
    let mut confidence = BASE_SCORE;
    let mut reasons = Vec::new();

    let ratio = if budget > Decimal::ZERO {
        (product.price / budget).to_f64().unwrap_or(f64::MAX)
    } else {
        f64::MAX
    };
    if ratio <= 0.9 {
        confidence += 0.2;
        reasons.push("comfortably within budget".to_string());
    } else if ratio <= 1.0 {
        confidence += 0.15;
        reasons.push("within budget".to_string());
    } else {
        confidence += 0.05;
        reasons.push("slightly over budget".to_string());
    }

    let text = product.haystack();
    if let Some(category) = rule
        .preferred_categories
        .iter()
        .find(|c| !c.trim().is_empty() && text.contains(&c.trim().to_lowercase()))
    {
        confidence += CATEGORY_WEIGHT;
        reasons.push(format!("matches preferred category '{}'", category.trim()));
    }

    if let Some(bucket) = age_bucket {
        if bucket.keywords().iter().any(|k| text.contains(k)) {
            confidence += AGE_WEIGHT;
            reasons.push(format!("suits the {} age group", bucket));
        }
    }

    if rule
        .relationship
        .suited_categories()
        .iter()
        .any(|k| text.contains(k))
    {
        confidence += RELATIONSHIP_WEIGHT;
        reasons.push(format!("fits a {} relationship", rule.relationship));
    }

    ScoredProduct {
        product: product.clone(),
        confidence: (confidence.min(1.0) * 100.0).round() / 100.0,
        reasoning: reasons.join("; "),
    }
}

/// Filters, scores and ranks `candidates`, then decides on approval.
pub fn recommend(
    rule: &GiftingRule,
    event: &GiftEvent,
    candidates: &[CandidateProduct],
    auto_approve: bool,
    settings: &RecommendationSettings,
    now: DateTime<Utc>,
) -> RecommendationSet {
    let budget = adjusted_budget(rule);
    let cutoff = budget * OVER_BUDGET_CUTOFF;
    let age_bucket = event
        .recipient_birth_year
        .map(|year| AgeBucket::for_age(event.event_date.year() - year));

    let mut scored: Vec<ScoredProduct> = candidates
        .iter()
        .filter(|p| !p.is_blocked())
        .filter(|p| p.price <= cutoff)
        .map(|p| score(p, rule, budget, age_bucket))
        .collect();

    scored.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.product.price.cmp(&b.product.price))
    });
    scored.truncate(settings.max_results);

    let total = scored
        .first()
        .map(|s| s.product.price)
        .unwrap_or(Decimal::ZERO);
    let requires_approval =
        !auto_approve || total > settings.approval_threshold || total > rule.budget_limit;
    let approval_deadline =
        requires_approval.then(|| (event.event_date - settings.approval_lead).max(now));

    RecommendationSet {
        adjusted_budget: budget,
        recommendations: scored,
        total,
        requires_approval,
        approval_deadline,
    }
}
