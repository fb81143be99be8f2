/// Built-in screening universe, used when no `--universe` file is given.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    // Technology
    "AAPL", "MSFT", "GOOGL", "NVDA", "META", "AVGO", "ORCL", "CRM", "AMD", "ADBE",
    // Healthcare
    "JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT",
    // Financials
    "JPM", "BAC", "GS", "V", "MA", "WFC", "MS", "AXP",
    // Energy
    "XOM", "CVX", "COP", "SLB",
    // Consumer
    "AMZN", "TSLA", "HD", "NKE", "MCD", "COST", "WMT", "PG", "KO", "PEP",
    // Industrials
    "CAT", "BA", "HON", "UPS", "GE", "DE",
    // Communications
    "NFLX", "DIS", "CMCSA", "TMUS",
];

/// Parse a universe file: one symbol per line, `#` starts a comment
/// (whole-line or trailing), blank lines skipped. Duplicates are dropped,
/// first occurrence wins, so the screen order follows the file.
pub fn parse_universe(contents: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut symbols = Vec::new();

    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let symbol = line.to_uppercase();
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    symbols
}
