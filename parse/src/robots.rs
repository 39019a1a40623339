//! robots.txt parsing.
//!
//! The admission gate only needs two things from a robots.txt: the set of
//! disallowed path-prefixes that apply to our user-agent, and any `Sitemap:`
//! URLs (which become sitemap jobs). Group selection is the usual
//! most-specific-wins: the longest user-agent token contained in ours, with
//! `*` as the fallback; `Disallow` lines from every matching group of that
//! token are merged.

/// Rules applicable to one host for one user-agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    /// Disallowed path prefixes. An empty `Disallow:` line contributes
    /// nothing (it means allow-all).
    pub disallow: Vec<String>,
    /// Sitemap URLs, host-wide regardless of user-agent groups.
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Whether `path` falls under a disallowed prefix.
    #[must_use]
    pub fn is_disallowed(&self, path: &str) -> bool {
        self.disallow.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Parse a robots.txt body for the given user-agent token.
#[must_use]
pub fn parse_robots(content: &str, user_agent: &str) -> RobotsRules {
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    let ua_lower = user_agent.to_ascii_lowercase();

    // First pass: find the most specific matching user-agent token.
    let mut best_token: Option<String> = None;
    for line in content.lines() {
        let Some((directive, value)) = split_directive(line) else {
            continue;
        };
        if directive != "user-agent" {
            continue;
        }
        let token = value.to_ascii_lowercase();
        if token == "*" {
            continue;
        }
        if ua_lower.contains(&token)
            && best_token.as_ref().is_none_or(|best| token.len() > best.len())
        {
            best_token = Some(token);
        }
    }

    // Second pass: collect Disallow lines from the chosen groups and
    // Sitemap lines from anywhere.
    let mut rules = RobotsRules::default();
    let mut current_agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for line in content.lines() {
        let Some((directive, value)) = split_directive(line) else {
            continue;
        };

        match directive.as_str() {
            "user-agent" => {
                if in_rules {
                    current_agents.clear();
                    in_rules = false;
                }
                current_agents.push(value.to_ascii_lowercase());
            }
            "disallow" => {
                in_rules = true;
                if value.is_empty() {
                    continue;
                }
                let applies = match &best_token {
                    Some(token) => current_agents.iter().any(|a| a == token),
                    None => current_agents.iter().any(|a| a == "*"),
                };
                if applies && !rules.disallow.iter().any(|d| d == value) {
                    rules.disallow.push(value.to_string());
                }
            }
            "allow" => in_rules = true,
            "sitemap" => {
                if !value.is_empty() && !rules.sitemaps.iter().any(|s| s == value) {
                    rules.sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    rules
}

fn split_directive(line: &str) -> Option<(String, &str)> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    let (directive, value) = line.split_once(':')?;
    Some((directive.trim().to_ascii_lowercase(), value.trim()))
}
