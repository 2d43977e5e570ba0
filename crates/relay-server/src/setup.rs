//! Client bootstrap script served at `/setup`.

/// `scheme://host[:port]` safe to splice into a shell script, or `None` when
/// the host carries anything beyond hostname/IP characters.
pub fn relay_base_url(scheme: &str, host: &str) -> Option<String> {
    let scheme = match scheme {
        "http" | "https" => scheme,
        _ => return None,
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    host_ok.then(|| format!("{scheme}://{host}"))
}

/// Render the installer. It only talks to the relay's public HTTP surface.
pub fn render_setup_script(relay_url: &str, port: u16) -> String {
    format!(
        r#"#!/usr/bin/env bash
# copilot-relay client bootstrap
set -euo pipefail

RELAY_URL="${{RELAY_URL:-{relay_url}}}"
INSTALL_DIR="${{INSTALL_DIR:-$HOME/.copilot-relay}}"
CONFIG_DIR="${{XDG_CONFIG_HOME:-$HOME/.config}}/copilot-relay"

echo "==> Checking relay at $RELAY_URL"
if ! curl -fsS "$RELAY_URL/health" >/dev/null; then
    echo "error: relay at $RELAY_URL is not reachable" >&2
    exit 1
fi

echo "==> Downloading bundle into $INSTALL_DIR"
mkdir -p "$INSTALL_DIR"
curl -fsSL "$RELAY_URL/bundle.tar.gz" | tar -xzf - -C "$INSTALL_DIR"

mkdir -p "$CONFIG_DIR"
if [ ! -f "$CONFIG_DIR/config.json" ]; then
    cat > "$CONFIG_DIR/config.json" <<JSON
{{
  "github_token": null,
  "relay": {{ "enabled": true, "mode": "client", "port": {port} }}
}}
JSON
    chmod 600 "$CONFIG_DIR/config.json"
fi

if [ -x "$INSTALL_DIR/install.sh" ]; then
    echo "==> Running bundled installer"
    RELAY_URL="$RELAY_URL" "$INSTALL_DIR/install.sh"
fi

echo "==> Relay auth status:"
curl -fsS "$RELAY_URL/auth/status" || true
echo
echo "Point OpenAI-compatible clients at: $RELAY_URL/v1"
echo "  export OPENAI_BASE_URL=$RELAY_URL/v1"
echo "  export OPENAI_API_KEY=copilot-relay"
"#
    )
}
