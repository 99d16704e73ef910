//! Record extraction. Two strategies share one contract and are chosen per
//! page by a structural probe (or forced by configuration).

pub mod card;
pub mod catalog;
pub mod table;

use crate::error::ExtractionError;
use crate::models::{CompanyRecord, RecordShape};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use self::card::CardStrategy;
use self::table::TableStrategy;
use super::Page;

/// Where the page came from; stamped onto every record.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub region: &'a str,
    pub source_url: &'a str,
    pub link_base: &'a str,
}

pub trait ExtractionStrategy {
    fn shape(&self) -> RecordShape;

    /// Structural probe: does the document carry this layout?
    fn matches(&self, doc: &Html) -> bool;

    fn extract(&self, doc: &Html, ctx: &ExtractContext<'_>) -> Vec<CompanyRecord>;
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub(crate) fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector(format!("{css}: {e}")))
}

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "div", "dd", "dl", "dt", "footer", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "li", "ol", "p", "section", "table", "td", "th", "tr", "ul",
];

/// Rendered text of an element. Inline markup is concatenated as is; `<br>`
/// and block boundaries become a space.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(el, &mut out);
    out
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if name == "br" {
            out.push(' ');
        } else if BLOCK_ELEMENTS.contains(&name) {
            out.push(' ');
            push_text(child, out);
            out.push(' ');
        } else {
            push_text(child, out);
        }
    }
}

// ── Extractor ─────────────────────────────────────────────────────────────────

pub struct RecordExtractor {
    table: TableStrategy,
    card: CardStrategy,
    link_base: String,
}

impl RecordExtractor {
    pub fn new(link_base: impl Into<String>) -> Result<Self, ExtractionError> {
        Ok(Self {
            table: TableStrategy::new()?,
            card: CardStrategy::new()?,
            link_base: link_base.into(),
        })
    }

    fn strategy(&self, shape: RecordShape) -> &dyn ExtractionStrategy {
        match shape {
            RecordShape::Table => &self.table,
            RecordShape::Card => &self.card,
        }
    }

    /// Pick the strategy once per page: cards first, then tables.
    pub fn select_strategy(&self, doc: &Html) -> Option<&dyn ExtractionStrategy> {
        let candidates: [&dyn ExtractionStrategy; 2] = [&self.card, &self.table];
        candidates.into_iter().find(|s| s.matches(doc))
    }

    /// Extract all retained records from one page. `NoStructure` means the
    /// page carries neither layout; an empty list means the layout was found
    /// but held no valid entries.
    pub fn extract(
        &self,
        page: &Page,
        region: &str,
        forced: Option<RecordShape>,
    ) -> Result<Vec<CompanyRecord>, ExtractionError> {
        let doc = Html::parse_document(&page.html);

        let strategy = match forced {
            Some(shape) => self.strategy(shape),
            None => self.select_strategy(&doc).ok_or(ExtractionError::NoStructure)?,
        };
        debug!("{}: using {} strategy", page.url, strategy.shape().as_str());

        let ctx = ExtractContext {
            region,
            source_url: &page.url,
            link_base: &self.link_base,
        };
        Ok(strategy.extract(&doc, &ctx))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Table page in the KazDATA layout.
    pub fn table_page(rows: &[(&str, &str)]) -> String {
        let mut body = String::from(
            "<html><body><table class=\"sp\"><tbody>\
             <tr><td>БИН</td><td>Наименование</td><td>ОКЭД</td><td>Вид деятельности</td>\
             <td>КАТО</td><td>Населенный пункт</td><td>КРП</td><td>Размер</td><td>Примечание</td></tr>",
        );
        for (bin, name) in rows {
            body.push_str(&format!(
                "<tr><td>{bin}</td><td>{name}</td><td>35111</td><td>Производство электроэнергии</td>\
                 <td>551010000</td><td>г.Павлодар</td><td>311</td><td>Крупные предприятия<br>(1001+ чел.)</td><td></td></tr>"
            ));
        }
        body.push_str("</tbody></table></body></html>");
        body
    }

    /// One statsnet-style company card.
    pub fn card(name: &str, bin: &str, status_class: &str) -> String {
        format!(
            r#"<li class="flex flex-col border-b py-2">
                 <a href="/companies/{bin}"><h2>{name}</h2></a>
                 <p class="text-sm">Казахстан, г. Алматы, ул. Абая 10</p>
                 <div class="text-sm gap-1">Розничная торговля</div>
                 <p class="text-sm text-statsnet flex gap-1 flex-wrap">Иванов Иван — <span class="text-black">руководитель</span></p>
                 <p class="text-sm text-gray-500">Малое предприятие (до 15 чел.)</p>
                 <div class="d-flex"><span class="text-sm text-gray-500">БИН {bin}</span></div>
                 <span class="ui-status {status_class}"></span>
               </li>"#
        )
    }

    pub fn card_page(cards: &[String]) -> String {
        format!("<html><body><ul>{}</ul></body></html>", cards.join(""))
    }
}
