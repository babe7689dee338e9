const BLUE: &str = "\x1b[94m";
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMarkers {
    pub info: String,
    pub success: String,
    pub failed: String,
}

impl StatusMarkers {
    pub fn colored() -> Self {
        Self {
            info: format!("{BLUE}[INFO]  {RESET}"),
            success: format!("{GREEN}[OK]    {RESET}"),
            failed: format!("{RED}[FAILED]{RESET}"),
        }
    }

    pub fn plain() -> Self {
        Self {
            info: "[INFO]  ".to_string(),
            success: "[OK]    ".to_string(),
            failed: "[FAILED]".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reporter {
    markers: StatusMarkers,
}

impl Reporter {
    pub fn new(markers: StatusMarkers) -> Self {
        Self { markers }
    }

    pub fn info_line(&self, message: &str) -> String {
        format!("{} {message}", self.markers.info)
    }

    pub fn success_line(&self, message: &str) -> String {
        format!("{} {message}", self.markers.success)
    }

    pub fn failed_line(&self, message: &str) -> String {
        format!("{} {message}", self.markers.failed)
    }

    pub fn info(&self, message: &str) {
        tracing::info!("{}", self.info_line(message));
    }

    pub fn success(&self, message: &str) {
        tracing::info!("{}", self.success_line(message));
    }

    pub fn failed(&self, message: &str) {
        tracing::error!("{}", self.failed_line(message));
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(StatusMarkers::plain())
    }
}
