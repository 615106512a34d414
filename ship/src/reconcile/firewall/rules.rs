//! Parser for `ufw status` output
//!
//! A numbered listing looks like:
//!
//! ```text
//! Status: active
//!
//!      To                         Action      From
//!      --                         ------      ----
//! [ 1] 22/tcp                     ALLOW IN    Anywhere
//! [ 2] OpenSSH                    ALLOW IN    Anywhere
//! [ 3] 6000:6007/tcp              DENY IN     Anywhere
//! [ 4] 22/tcp (v6)                ALLOW IN    Anywhere (v6)
//! ```
//!
//! Only the status line is mandatory. Lines that do not start with `[`, or
//! that do not have a recognizable shape, are skipped.

use std::fmt;

use tracing::debug;

use crate::errors::ShipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
    Reject,
    Limit,
}

impl Action {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "ALLOW" => Some(Action::Allow),
            "DENY" => Some(Action::Deny),
            "REJECT" => Some(Action::Reject),
            "LIMIT" => Some(Action::Limit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Fwd,
    /// Listing without a direction column
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("v4"),
            Family::V6 => f.write_str("v6"),
        }
    }
}

/// The `To` column of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// `PORT[/proto]`
    Port { port: u16, protocol: Option<String> },
    /// `LOW:HIGH[/proto]` or `P1,P2[/proto]`; never matched to a single port
    Range { ports: String, protocol: Option<String> },
    /// Application profile, address or anything else opaque
    Service(String),
}

impl RuleTarget {
    fn parse(to: &str) -> Self {
        let (base, protocol) = match to.split_once('/') {
            Some((base, proto)) => (base, Some(proto.to_ascii_lowercase())),
            None => (to, None),
        };
        if base.contains(' ') {
            return RuleTarget::Service(to.to_string());
        }
        if let Ok(port) = base.parse::<u16>() {
            return RuleTarget::Port { port, protocol };
        }
        let is_port_list = !base.is_empty()
            && base.chars().all(|c| c.is_ascii_digit() || c == ':' || c == ',')
            && base.chars().any(|c| c == ':' || c == ',');
        if is_port_list {
            return RuleTarget::Range {
                ports: base.to_string(),
                protocol,
            };
        }
        RuleTarget::Service(to.to_string())
    }
}

/// One line of `ufw status numbered`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    /// 1-based position in the listing; shifts after every deletion
    pub number: usize,
    pub target: RuleTarget,
    pub action: Action,
    pub direction: Direction,
    pub family: Family,
}

impl FirewallRule {
    /// An `allow` rule for inbound traffic
    pub fn is_inbound_allow(&self) -> bool {
        self.action == Action::Allow
            && matches!(self.direction, Direction::In | Direction::Unspecified)
    }

    /// The single TCP port this rule opens, if that is all it does
    pub fn tcp_port(&self) -> Option<u16> {
        match &self.target {
            RuleTarget::Port {
                port,
                protocol: Some(protocol),
            } if protocol == "tcp" => Some(*port),
            _ => None,
        }
    }
}

/// Read the `Status:` line; `true` when active
///
/// Missing or unrecognized status is a [`ShipError::ParseError`].
pub fn parse_status(text: &str) -> Result<bool, ShipError> {
    for line in text.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("status") {
            continue;
        }
        return match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(true),
            "inactive" => Ok(false),
            other => Err(ShipError::ParseError(format!(
                "unexpected firewall status {:?}",
                other
            ))),
        };
    }
    Err(ShipError::ParseError(format!(
        "no status line in firewall output: {:?}",
        text.trim()
    )))
}

/// Parse every rule line of a numbered listing
pub fn parse_rules(text: &str) -> Vec<FirewallRule> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('[') {
                return None;
            }
            let rule = parse_rule_line(line);
            if rule.is_none() {
                debug!("Skipping unrecognized firewall line: {}", line);
            }
            rule
        })
        .collect()
}

fn parse_rule_line(line: &str) -> Option<FirewallRule> {
    let (number, rest) = line.strip_prefix('[')?.split_once(']')?;
    let number = number.trim().parse::<usize>().ok().filter(|n| *n > 0)?;

    // drop trailing comment
    let rest = rest.split_once(" # ").map_or(rest, |(rule, _)| rule);
    let tokens: Vec<&str> = rest.split_whitespace().collect();

    let action_at = tokens.iter().position(|t| Action::parse(t).is_some())?;
    let action = Action::parse(tokens[action_at])?;

    let family = if tokens.iter().any(|t| *t == "(v6)") {
        Family::V6
    } else {
        Family::V4
    };

    let to: Vec<&str> = tokens[..action_at]
        .iter()
        .copied()
        .filter(|t| *t != "(v6)")
        .collect();
    if to.is_empty() {
        return None;
    }

    let direction = match tokens.get(action_at + 1).map(|t| t.to_ascii_uppercase()) {
        Some(t) if t == "IN" => Direction::In,
        Some(t) if t == "OUT" => Direction::Out,
        Some(t) if t == "FWD" => Direction::Fwd,
        _ => Direction::Unspecified,
    };

    Some(FirewallRule {
        number,
        target: RuleTarget::parse(&to.join(" ")),
        action,
        direction,
        family,
    })
}
