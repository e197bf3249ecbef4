use rand::Rng;

/// Rotates through a fixed set of desktop browser user agents.
#[derive(Debug, Clone)]
pub struct UserAgentGenerator {
    user_agents: Vec<String>,
}

impl UserAgentGenerator {
    pub fn new() -> Self {
        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
        ];

        Self { user_agents }
    }

    pub fn random_user_agent(&self) -> &str {
        let mut rng = rand::thread_rng();
        let index = rng.gen_range(0..self.user_agents.len());
        &self.user_agents[index]
    }
}

impl Default for UserAgentGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Chrome flags for an unattended headless render.
pub fn headless_args(user_data_dir: &str) -> Vec<String> {
    [
        "--headless",
        "--no-sandbox",
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--mute-audio",
        "--no-first-run",
        "--disable-default-apps",
        "--disable-sync",
        "--disable-background-networking",
        "--disable-blink-features=AutomationControlled", // hide automation
        "--remote-debugging-port=0",
        "--log-level=3",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .chain(std::iter::once(format!("--user-data-dir={}", user_data_dir)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_generation() {
        let generator = UserAgentGenerator::new();
        for _ in 0..20 {
            let ua = generator.random_user_agent();
            assert!(ua.starts_with("Mozilla/5.0"));
        }
    }

    #[test]
    fn test_headless_args_include_profile_dir() {
        let args = headless_args("/tmp/profile-1");
        assert!(args.contains(&"--headless".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--user-data-dir=/tmp/profile-1"));
    }
}
