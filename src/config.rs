use clap::Parser;

use crate::engine::EngineParams;

/// Cross-exchange mispricing detector for sports prediction markets
#[derive(Parser, Debug, Clone)]
#[command(name = "mispricing-bot", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "mispricing.db")]
    pub database_path: String,

    /// Dashboard / API listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// Polymarket Gamma (market listings) base URL
    #[arg(
        long,
        env = "POLY_GAMMA_BASE_URL",
        default_value = "https://gamma-api.polymarket.com"
    )]
    pub poly_gamma_base_url: String,

    /// Polymarket CLOB (order book) base URL
    #[arg(
        long,
        env = "POLY_CLOB_BASE_URL",
        default_value = "https://clob.polymarket.com"
    )]
    pub poly_clob_base_url: String,

    /// Kalshi REST base URL
    #[arg(
        long,
        env = "KALSHI_REST_BASE_URL",
        default_value = "https://api.elections.kalshi.com/trade-api/v2"
    )]
    pub kalshi_rest_base_url: String,

    /// Kalshi WebSocket URL for order-book deltas
    #[arg(
        long,
        env = "KALSHI_WS_URL",
        default_value = "wss://api.elections.kalshi.com/trade-api/ws/v2"
    )]
    pub kalshi_ws_url: String,

    /// Minimum after-cost edge required to emit a signal
    #[arg(long, env = "MIN_EDGE", default_value = "0.008")]
    pub min_edge: f64,

    /// Slippage estimate as a fraction of the wider spread
    #[arg(long, env = "SLIPPAGE_K", default_value = "0.20")]
    pub slippage_k: f64,

    /// Maximum notional committed to a single event (USD)
    #[arg(long, env = "MAX_NOTIONAL_PER_EVENT", default_value = "250.0")]
    pub max_notional_per_event: f64,

    /// Required visible depth as a multiple of trade size
    #[arg(long, env = "DEPTH_MULTIPLIER", default_value = "1.5")]
    pub depth_multiplier: f64,

    /// Do not signal events starting sooner than this many seconds
    #[arg(long, env = "MIN_SECONDS_TO_START", default_value = "300")]
    pub min_seconds_to_start: i64,

    /// Include soccer markets in discovery
    #[arg(long, env = "ENABLE_SOCCER", default_value = "true")]
    pub enable_soccer: bool,

    /// Include NBA markets in discovery
    #[arg(long, env = "ENABLE_NBA", default_value = "true")]
    pub enable_nba: bool,

    /// Polymarket taker fee in basis points
    #[arg(long, env = "FEE_POLY_BPS", default_value = "40.0")]
    pub fee_poly_bps: f64,

    /// Kalshi taker fee in basis points
    #[arg(long, env = "FEE_KALSHI_BPS", default_value = "35.0")]
    pub fee_kalshi_bps: f64,

    /// Market discovery loop interval in seconds
    #[arg(long, env = "DISCOVERY_INTERVAL_SEC", default_value = "180")]
    pub discovery_interval_sec: u64,

    /// Signal loop interval in seconds
    #[arg(long, env = "SIGNAL_INTERVAL_SEC", default_value = "2")]
    pub signal_interval_sec: u64,

    /// Snapshot broadcast interval in seconds
    #[arg(long, env = "WS_BROADCAST_INTERVAL_SEC", default_value = "1.0")]
    pub ws_broadcast_interval_sec: f64,

    /// Maximum markets pulled per venue per discovery cycle
    #[arg(long, env = "MARKET_DISCOVERY_LIMIT", default_value = "500")]
    pub market_discovery_limit: usize,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SEC", default_value = "15")]
    pub request_timeout_sec: u64,

    /// Path to the manual pair-override file
    #[arg(long, env = "OVERRIDES_PATH", default_value = "overrides.yml")]
    pub overrides_path: String,

    /// Market data source: "direct" (venue APIs) or "router"
    #[arg(long, env = "MARKET_DATA_SOURCE", default_value = "direct")]
    pub market_data_source: String,

    /// Enable the unified router data source
    #[arg(long, env = "ROUTER_ENABLE", default_value = "false")]
    pub router_enable: bool,

    /// Unified router base URL
    #[arg(
        long,
        env = "ROUTER_BASE_URL",
        default_value = "https://api.polyrouter.io/v1"
    )]
    pub router_base_url: String,

    /// Unified router API key
    #[arg(long, env = "ROUTER_API_KEY")]
    pub router_api_key: Option<String>,

    /// Maximum listing pages fetched per router discovery call
    #[arg(long, env = "ROUTER_MARKET_PAGE_LIMIT", default_value = "5")]
    pub router_market_page_limit: usize,

    /// Market ids per router order-book request
    #[arg(long, env = "ROUTER_ORDERBOOK_BATCH_SIZE", default_value = "20")]
    pub router_orderbook_batch_size: usize,

    /// Global router request budget per minute
    #[arg(long, env = "ROUTER_REQ_PER_MINUTE", default_value = "60")]
    pub router_req_per_minute: u32,

    /// Substitute built-in demo markets when live discovery comes up empty
    #[arg(long, env = "ENABLE_DEMO_FALLBACK", default_value = "false")]
    pub enable_demo_fallback: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("poly_gamma_base_url", &self.poly_gamma_base_url),
            ("poly_clob_base_url", &self.poly_clob_base_url),
            ("kalshi_rest_base_url", &self.kalshi_rest_base_url),
            ("kalshi_ws_url", &self.kalshi_ws_url),
            ("router_base_url", &self.router_base_url),
        ] {
            if let Err(err) = url::Url::parse(value) {
                anyhow::bail!("{name} is not a valid URL: {err}");
            }
        }
        if !(0.0..=1.0).contains(&self.min_edge) {
            anyhow::bail!("min_edge must be between 0.0 and 1.0");
        }
        if !(0.0..=10.0).contains(&self.slippage_k) {
            anyhow::bail!("slippage_k must be between 0.0 and 10.0");
        }
        if self.max_notional_per_event <= 0.0 {
            anyhow::bail!("max_notional_per_event must be positive");
        }
        if self.depth_multiplier < 1.0 {
            anyhow::bail!("depth_multiplier must be at least 1.0");
        }
        if self.min_seconds_to_start < 0 {
            anyhow::bail!("min_seconds_to_start must not be negative");
        }
        if !(0.0..=1_000.0).contains(&self.fee_poly_bps) {
            anyhow::bail!("fee_poly_bps must be between 0 and 1000");
        }
        if !(0.0..=1_000.0).contains(&self.fee_kalshi_bps) {
            anyhow::bail!("fee_kalshi_bps must be between 0 and 1000");
        }
        if self.discovery_interval_sec == 0 {
            anyhow::bail!("discovery_interval_sec must be positive");
        }
        if self.signal_interval_sec == 0 {
            anyhow::bail!("signal_interval_sec must be positive");
        }
        if self.ws_broadcast_interval_sec <= 0.0 {
            anyhow::bail!("ws_broadcast_interval_sec must be positive");
        }
        if self.market_discovery_limit == 0 {
            anyhow::bail!("market_discovery_limit must be positive");
        }
        if self.request_timeout_sec == 0 || self.request_timeout_sec > 300 {
            anyhow::bail!("request_timeout_sec must be between 1 and 300");
        }
        match self.market_data_source.trim().to_lowercase().as_str() {
            "direct" | "router" => {}
            other => anyhow::bail!("market_data_source must be 'direct' or 'router', got '{other}'"),
        }
        if self.router_market_page_limit == 0 {
            anyhow::bail!("router_market_page_limit must be positive");
        }
        if self.router_orderbook_batch_size == 0 {
            anyhow::bail!("router_orderbook_batch_size must be positive");
        }
        if self.router_req_per_minute == 0 || self.router_req_per_minute > 1_000 {
            anyhow::bail!("router_req_per_minute must be between 1 and 1000");
        }
        Ok(())
    }

    /// The data source actually in use: "router" only when configured AND
    /// enabled with an API key, else "direct".
    pub fn active_market_data_source(&self) -> &'static str {
        let configured = self.market_data_source.trim().to_lowercase();
        if configured == "router" && self.router_enable && self.router_api_key.is_some() {
            "router"
        } else {
            "direct"
        }
    }

    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            min_edge: self.min_edge,
            slippage_k: self.slippage_k,
            max_notional_per_event: self.max_notional_per_event,
            depth_multiplier: self.depth_multiplier,
            min_seconds_to_start: self.min_seconds_to_start,
            fee_poly_bps: self.fee_poly_bps,
            fee_kalshi_bps: self.fee_kalshi_bps,
        }
    }
}
