use std::io::Write;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use jobhive_core::read_yaml_file;
use jobhive_gateway::{JobSearch, Messenger};
use jobhive_schema::{JobListing, JobPage, UserId};

/// Job catalogue loaded from a YAML list, matched by title substring.
pub struct CatalogSearch {
    listings: Vec<JobListing>,
}

impl CatalogSearch {
    pub fn new(listings: Vec<JobListing>) -> Self {
        Self { listings }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let listings: Vec<JobListing> = read_yaml_file(path)?;
        tracing::info!(path = %path.display(), count = listings.len(), "job catalogue loaded");
        Ok(Self::new(listings))
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    fn matching(&self, query: &str) -> Vec<&JobListing> {
        let needle = fold(query);
        self.listings
            .iter()
            .filter(|listing| fold(&listing.title).contains(&needle))
            .collect()
    }
}

/// Lowercase with French accents stripped, so "developpeur" finds "Développeur".
fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[async_trait]
impl JobSearch for CatalogSearch {
    async fn search(&self, query: &str, offset: u32, limit: u32) -> Result<JobPage> {
        let matches = self.matching(query);
        let listings = matches
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|listing| (*listing).clone())
            .collect();
        Ok(JobPage {
            query: query.to_string(),
            offset,
            total: u32::try_from(matches.len()).unwrap_or(u32::MAX),
            listings,
        })
    }
}

/// Prints outbound messages to stdout for the local REPL.
pub struct ConsoleMessenger;

impl ConsoleMessenger {
    fn print(&self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "\n{text}")?;
        write!(out, "> ")?;
        out.flush()?;
        Ok(())
    }
}

pub fn render_page(page: &JobPage) -> String {
    if page.listings.is_empty() {
        return if page.offset == 0 {
            format!("Aucune offre trouvée pour « {} ». Essayez un autre intitulé.", page.query)
        } else {
            "Il n'y a pas d'autres offres pour cette recherche.".to_string()
        };
    }

    let mut lines = vec![format!(
        "Offres pour « {} » ({}-{} sur {}) :",
        page.query,
        page.offset + 1,
        page.offset as usize + page.listings.len(),
        page.total
    )];
    for listing in &page.listings {
        let mut line = format!("• {} chez {}", listing.title, listing.company);
        if let Some(location) = &listing.location {
            line.push_str(&format!(" ({location})"));
        }
        if let Some(url) = &listing.url {
            line.push_str(&format!("\n  {url}"));
        }
        lines.push(line);
    }
    if page.has_more() {
        lines.push("Répondez « voir plus » pour la suite.".to_string());
    }
    lines.join("\n")
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send_welcome(&self, _user_id: &UserId) -> Result<()> {
        self.print("Bienvenue ! Je vous aide à trouver un emploi. Quel poste recherchez-vous ?")
    }

    async fn send_prompt(&self, _user_id: &UserId) -> Result<()> {
        self.print("Quel intitulé de poste recherchez-vous ?")
    }

    async fn send_results(&self, _user_id: &UserId, page: &JobPage) -> Result<()> {
        self.print(&render_page(page))
    }
}
