// Status indicator fed with the current message count

/// Output lines used when none are configured
pub const DEFAULT_INDICATOR_LINES: [u32; 4] = [11, 12, 13, 15];

/// Receives the store size after every change
pub trait StatusIndicator: Send {
    fn notify(&mut self, count: usize);
}

/// Indicator that only logs the count
#[derive(Debug, Default, Clone)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn notify(&mut self, count: usize) {
        tracing::info!("{} messages stored on this server", count);
    }
}

/// Shows the count in binary across a set of output lines
///
/// Line `i` is high when bit `i` of the count is set; counts wider than
/// the line set wrap around.
#[derive(Debug, Clone)]
pub struct BitPatternIndicator {
    lines: Vec<u32>,
    levels: Vec<bool>,
}

impl BitPatternIndicator {
    pub fn new(lines: Vec<u32>) -> Self {
        let levels = vec![false; lines.len()];
        Self { lines, levels }
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// Current level of each line, in line order
    pub fn levels(&self) -> &[bool] {
        &self.levels
    }
}

impl Default for BitPatternIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_INDICATOR_LINES.to_vec())
    }
}

impl StatusIndicator for BitPatternIndicator {
    fn notify(&mut self, count: usize) {
        tracing::info!("{} messages stored on this server", count);

        self.levels = encode_bits(count, self.lines.len());

        for (line, high) in self.lines.iter().zip(&self.levels) {
            tracing::debug!("Indicator line {} -> {}", line, if *high { "high" } else { "low" });
        }
    }
}

/// Low `width` bits of `count`, least significant first
pub fn encode_bits(count: usize, width: usize) -> Vec<bool> {
    (0..width)
        .map(|i| i < usize::BITS as usize && count & (1 << i) != 0)
        .collect()
}
