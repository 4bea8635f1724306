pub mod firecrawl;

pub use firecrawl::{DEFAULT_BASE_URL, FirecrawlService};
