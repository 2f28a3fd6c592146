use scraper::{ElementRef, Html, Selector};

use super::RawRow;
use crate::models::HtmlRules;
use crate::utils::error::ExtractError;

struct CompiledRules {
    row: Selector,
    title: Selector,
    link: Selector,
    link_attr: String,
    id: Option<Selector>,
    deadline: Option<Selector>,
    buyer: Option<Selector>,
    category: Option<Selector>,
    description: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

fn compile_opt(selector: Option<&str>) -> Result<Option<Selector>, ExtractError> {
    selector.map(compile).transpose()
}

impl CompiledRules {
    fn new(rules: &HtmlRules) -> Result<Self, ExtractError> {
        // Without a link selector the first anchor in the row is used.
        let (link, link_attr) = match &rules.link {
            Some(selector) => (compile(selector)?, rules.link_attr.clone()),
            None => (compile("a[href]")?, "href".to_string()),
        };

        Ok(Self {
            row: compile(&rules.row)?,
            title: compile(&rules.title)?,
            link,
            link_attr,
            id: compile_opt(rules.id.as_deref())?,
            deadline: compile_opt(rules.deadline.as_deref())?,
            buyer: compile_opt(rules.buyer.as_deref())?,
            category: compile_opt(rules.category.as_deref())?,
            description: compile_opt(rules.description.as_deref())?,
        })
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn first_text(row: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    row.select(selector).next().map(element_text)
}

/// `<time datetime=..>` and similar carry a machine-readable value.
fn first_deadline(row: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    let element = row.select(selector).next()?;
    element
        .value()
        .attr("datetime")
        .map(str::to_string)
        .or_else(|| Some(element_text(element)))
}

fn row_link(row: ElementRef<'_>, rules: &CompiledRules) -> Option<String> {
    // The row itself may be the anchor.
    if let Some(value) = row.value().attr(&rules.link_attr) {
        if rules.link.matches(&row) {
            return Some(value.to_string());
        }
    }
    row.select(&rules.link)
        .find_map(|el| el.value().attr(&rules.link_attr))
        .map(str::to_string)
}

/// Apply the row selectors to every captured page, in page then document order.
pub fn extract_rows(pages: &[String], rules: &HtmlRules) -> Result<Vec<RawRow>, ExtractError> {
    let compiled = CompiledRules::new(rules)?;
    let mut rows = Vec::new();

    for page in pages {
        let document = Html::parse_document(page);
        for row in document.select(&compiled.row) {
            rows.push(RawRow {
                title: first_text(row, Some(&compiled.title)),
                link: row_link(row, &compiled),
                id: first_text(row, compiled.id.as_ref()),
                deadline: first_deadline(row, compiled.deadline.as_ref()),
                buyer: first_text(row, compiled.buyer.as_ref()),
                category: first_text(row, compiled.category.as_ref()),
                description: first_text(row, compiled.description.as_ref()),
            });
        }
    }

    Ok(rows)
}

/// Visible text of the document body, used when a JSON feed was rendered by a browser.
pub fn body_text(page: &str) -> String {
    let document = Html::parse_document(page);
    match Selector::parse("body") {
        Ok(body) => document
            .select(&body)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}
