use crate::error::ExtractionError;
use crate::models::{CompanyRecord, RawCompanyRow, RecordShape};
use crate::scraper::cleaner::{clean_rows, manager_name, status_from_classes};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{ExtractContext, ExtractionStrategy, element_text, selector};

/// Marker-based extraction from statsnet-style company cards.
pub struct CardStrategy {
    card: Selector,
    name: Selector,
    small_text: Selector,
    paragraph: Selector,
    activity: Selector,
    status: Selector,
    link: Selector,
    bin_re: Regex,
}

fn is_size_text(text: &str) -> bool {
    text.contains("предприятие") || text.contains("чел.")
}

impl CardStrategy {
    pub fn new() -> Result<Self, ExtractionError> {
        Ok(Self {
            card: selector("li.flex.flex-col.border-b.py-2")?,
            name: selector("h2")?,
            small_text: selector("p.text-sm")?,
            paragraph: selector("p")?,
            activity: selector("div.text-sm.gap-1")?,
            status: selector("span.ui-status")?,
            link: selector("a[href]")?,
            bin_re: Regex::new(r"БИН\s*(\d+)")
                .map_err(|e| ExtractionError::Selector(e.to_string()))?,
        })
    }

    fn first_paragraph(&self, card: ElementRef<'_>, pred: impl Fn(&str) -> bool) -> Option<String> {
        card.select(&self.paragraph)
            .map(element_text)
            .find(|text| pred(text.as_str()))
    }

    fn address(&self, card: ElementRef<'_>) -> Option<String> {
        card.select(&self.small_text)
            .map(element_text)
            .find(|text| {
                !text.trim().is_empty()
                    && !is_size_text(text)
                    && !text.contains("руководитель")
                    && !text.contains("БИН")
            })
            .or_else(|| self.first_paragraph(card, |t| t.contains("Казахстан")))
    }

    fn activity(&self, card: ElementRef<'_>) -> Option<String> {
        card.select(&self.activity)
            .map(element_text)
            .find(|text| !text.trim().is_empty() && !is_size_text(text))
    }

    fn status(&self, card: ElementRef<'_>) -> Option<String> {
        card.select(&self.status)
            .find_map(|el| status_from_classes(el.value().classes()))
            .map(str::to_string)
    }

    fn link(&self, card: ElementRef<'_>, base: &str) -> Option<String> {
        let href = card.select(&self.link).find_map(|a| a.value().attr("href"))?;
        match Url::parse(base).and_then(|b| b.join(href)) {
            Ok(url) => Some(url.to_string()),
            Err(_) => Some(format!("{}{}", base.trim_end_matches('/'), href)),
        }
    }

    fn card_to_raw(&self, card: ElementRef<'_>, ctx: &ExtractContext<'_>) -> RawCompanyRow {
        let text = element_text(card);
        let bin = self
            .bin_re
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let row = RawCompanyRow {
            name: card.select(&self.name).next().map(element_text),
            address: self.address(card),
            activity: self.activity(card),
            manager: self
                .first_paragraph(card, |t| t.contains("руководитель"))
                .and_then(|t| manager_name(&t)),
            company_size: self.first_paragraph(card, is_size_text),
            bin,
            status: self.status(card),
            link: self.link(card, ctx.link_base),
            region: Some(ctx.region.to_string()),
            source_url: Some(ctx.source_url.to_string()),
            ..Default::default()
        };

        if row.address.is_none() {
            debug!("Card without address marker: {:?}", row.name);
        }
        if row.status.is_none() {
            debug!("Card without status marker: {:?}", row.name);
        }
        row
    }
}

impl ExtractionStrategy for CardStrategy {
    fn shape(&self) -> RecordShape {
        RecordShape::Card
    }

    fn matches(&self, doc: &Html) -> bool {
        doc.select(&self.card).next().is_some()
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext<'_>) -> Vec<CompanyRecord> {
        let raw: Vec<RawCompanyRow> = doc
            .select(&self.card)
            .map(|card| self.card_to_raw(card, ctx))
            .collect();
        clean_rows(raw, RecordShape::Card)
    }
}
