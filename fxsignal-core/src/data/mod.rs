//! Market data: providers, the fetch pipeline and the fetcher

pub mod alpha_vantage;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod provider;
pub mod twelve_data;

pub use alpha_vantage::AlphaVantageProvider;
pub use error::{ErrorKind, FetchError};
pub use fetcher::{DataFetcher, MarketData};
pub use pipeline::{FetchPipeline, FetchRequest};
pub use provider::{Interval, MarketDataProvider, ProviderConfig, ProviderKind};
pub use twelve_data::TwelveDataProvider;
