// Platform key aliasing, resolved once at startup.

/// Host-specific key naming: which modifier the platform-neutral
/// aliases land on and how a paste is performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    aliases: &'static [(&'static str, &'static str)],
    paste: &'static [&'static str],
}

const MACOS_ALIASES: &[(&str, &str)] =
    &[("win", "command"), ("meta", "command"), ("cmd", "command")];
const STANDARD_ALIASES: &[(&str, &str)] = &[("meta", "win")];

impl KeyMap {
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            Self::macos()
        } else {
            Self::standard()
        }
    }

    pub fn macos() -> Self {
        Self {
            aliases: MACOS_ALIASES,
            paste: &["command", "v"],
        }
    }

    /// Windows, Linux and everything else.
    pub fn standard() -> Self {
        Self {
            aliases: STANDARD_ALIASES,
            paste: &["ctrl", "v"],
        }
    }

    pub fn resolve(&self, key: &str) -> String {
        let key = key.trim().to_lowercase();
        self.aliases
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or(key)
    }

    /// Splits a combo such as `"ctrl shift t"` or `"ctrl+c"` into host key names.
    /// A `+` that does not join two keys is the plus key itself.
    pub fn split_combo(&self, combo: &str) -> Vec<String> {
        combo
            .split_whitespace()
            .flat_map(split_joined)
            .map(|k| self.resolve(k))
            .collect()
    }

    pub fn paste_combo(&self) -> Vec<String> {
        self.paste.iter().map(|k| k.to_string()).collect()
    }
}

/// `"ctrl+c"` joins two keys; `"+"` and the tail of `"ctrl++"` are the plus key.
fn split_joined(token: &str) -> Vec<&str> {
    if token.chars().all(|c| c == '+') {
        return vec!["+"];
    }
    let mut keys: Vec<&str> = token.split('+').filter(|k| !k.is_empty()).collect();
    if token.ends_with("++") {
        keys.push("+");
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macos_aliases_land_on_command() {
        let km = KeyMap::macos();
        assert_eq!(km.split_combo("win space"), vec!["command", "space"]);
        assert_eq!(km.split_combo("meta+c"), vec!["command", "c"]);
        assert_eq!(km.split_combo("cmd tab"), vec!["command", "tab"]);
        assert_eq!(km.paste_combo(), vec!["command", "v"]);
    }

    #[test]
    fn standard_aliases_land_on_win() {
        let km = KeyMap::standard();
        assert_eq!(km.split_combo("meta d"), vec!["win", "d"]);
        assert_eq!(km.split_combo("Ctrl  Shift   Esc"), vec!["ctrl", "shift", "esc"]);
        assert_eq!(km.paste_combo(), vec!["ctrl", "v"]);
    }

    #[test]
    fn standalone_plus_is_a_key() {
        let km = KeyMap::standard();
        assert_eq!(km.split_combo("ctrl +"), vec!["ctrl", "+"]);
        assert_eq!(km.split_combo("ctrl shift +"), vec!["ctrl", "shift", "+"]);
        assert_eq!(km.split_combo("ctrl++"), vec!["ctrl", "+"]);
        assert_eq!(km.split_combo("ctrl+shift+t"), vec!["ctrl", "shift", "t"]);
    }

    #[test]
    fn empty_combo_has_no_keys() {
        assert!(KeyMap::standard().split_combo("   ").is_empty());
    }
}
