//! Configuration for the decompilation pipeline.
//!
//! The configuration is an immutable value passed to every pipeline run; nothing in the
//! crate reads process-wide settings.

/// Game whose action table the script was compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameVariant {
    /// Knights of the Old Republic
    #[default]
    K1,
    /// The Sith Lords
    K2,
}

impl GameVariant {
    /// File name of the action manifest for this game.
    #[must_use]
    pub fn action_manifest_name(self) -> &'static str {
        match self {
            GameVariant::K1 => "k1_nwscript.nss",
            GameVariant::K2 => "tsl_nwscript.nss",
        }
    }
}

/// Configuration for the decompiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompilerConfig {
    /// Game variant, selects the action manifest (default: K1).
    pub game: GameVariant,

    /// Emit `switch` statements for equality ladders on one value (default: true).
    ///
    /// When disabled, ladders without fallthrough are emitted as `if`/`else if` chains.
    pub prefer_switches: bool,

    /// Log a warning when prototype inference does not converge (default: false).
    ///
    /// Incomplete convergence is always reported as a diagnostic; strict mode never aborts.
    pub strict_signatures: bool,

    /// Cap on type pass iterations over all subroutines (default: 1000).
    pub max_iterations: usize,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            game: GameVariant::K1,
            prefer_switches: true,
            strict_signatures: false,
            max_iterations: 1000,
        }
    }
}

impl DecompilerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the game variant.
    #[must_use]
    pub fn with_game(mut self, game: GameVariant) -> Self {
        self.game = game;
        self
    }

    /// Enables or disables `switch` generation.
    #[must_use]
    pub fn with_prefer_switches(mut self, enable: bool) -> Self {
        self.prefer_switches = enable;
        self
    }

    /// Enables or disables strict signature reporting.
    #[must_use]
    pub fn with_strict_signatures(mut self, enable: bool) -> Self {
        self.strict_signatures = enable;
        self
    }

    /// Sets the iteration cap of the prototype fixed point.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum number of full type pass iterations, at least 1.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = DecompilerConfig::new();
        assert_eq!(config.game, GameVariant::K1);
        assert!(config.prefer_switches);
        assert!(!config.strict_signatures);
        assert_eq!(config.max_iterations, 1000);

        let config = config
            .with_game(GameVariant::K2)
            .with_prefer_switches(false)
            .with_strict_signatures(true)
            .with_max_iterations(0);
        assert_eq!(config.game.action_manifest_name(), "tsl_nwscript.nss");
        assert!(!config.prefer_switches);
        assert!(config.strict_signatures);
        assert_eq!(config.max_iterations, 1);
    }
}
