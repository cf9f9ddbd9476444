//! WireGuard config rendering
//!
//! Pure text generation: these functions take an immutable snapshot of
//! instance/peer/allowed-IP records and produce `.conf` documents. No
//! database or filesystem access happens here; persistence lives in
//! [`super::export`].
//!
//! Optional-field policy: a line whose value is absent is omitted entirely,
//! never emitted with a blank value. `wg-quick` rejects empty values for
//! keys like `PresharedKey`, so the omit policy is pinned by tests below.

use thiserror::Error;
use uuid::Uuid;

use super::db::{Peer, PeerAllowedIP, WireGuardInstance};

/// Catch-all route list emitted in client peer blocks.
const CLIENT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Rendering failures, distinguishable from successful config text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("No allowed IP with priority zero found for peer {peer}")]
    MissingPriorityZeroIp { peer: Uuid },
}

/// Render the client-side config for a peer.
///
/// `allowed_ips` is the peer's server-side allowed-IP set; the priority-0
/// row supplies the client tunnel address. The client peer block always
/// routes everything through the tunnel via the catch-all `AllowedIPs`.
pub fn render_peer_config(
    instance: &WireGuardInstance,
    peer: &Peer,
    allowed_ips: &[PeerAllowedIP],
) -> Result<String, RenderError> {
    let priority_zero = allowed_ips
        .iter()
        .find(|ip| ip.priority == 0)
        .ok_or(RenderError::MissingPriorityZeroIp { peer: peer.id })?;

    let mut lines: Vec<String> = Vec::new();
    lines.push("[Interface]".to_string());
    if let Some(private_key) = &peer.private_key {
        lines.push(format!("PrivateKey = {}", private_key));
    }
    lines.push(format!(
        "Address = {}/{}",
        priority_zero.allowed_ip, priority_zero.netmask
    ));
    lines.push(format!("DNS = {}", instance.dns_primary));

    lines.push(String::new());
    lines.push("[Peer]".to_string());
    lines.push(format!("PublicKey = {}", instance.public_key));
    lines.push(format!(
        "Endpoint = {}:{}",
        instance.hostname, instance.listen_port
    ));
    lines.push(format!("AllowedIPs = {}", CLIENT_ALLOWED_IPS));
    if let Some(preshared_key) = &peer.preshared_key {
        lines.push(format!("PresharedKey = {}", preshared_key));
    }
    lines.push(format!(
        "PersistentKeepalive = {}",
        peer.persistent_keepalive
    ));

    let mut config = lines.join("\n");
    config.push('\n');
    Ok(config)
}

/// Render the server-side config for an instance.
///
/// Each peer block lists all of that peer's allowed-IP rows, comma-joined
/// in ascending priority order (including priority 0). Peer block order is
/// the caller's iteration order; the database layer returns peers sorted by
/// creation time so repeated renders are byte-identical.
pub fn render_instance_config(
    instance: &WireGuardInstance,
    peers: &[(Peer, Vec<PeerAllowedIP>)],
) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push("[Interface]".to_string());
    lines.push(format!("PrivateKey = {}", instance.private_key));
    lines.push(format!(
        "Address = {}/{}",
        instance.address, instance.netmask
    ));
    lines.push(format!("ListenPort = {}", instance.listen_port));
    if let Some(post_up) = non_empty(instance.post_up.as_deref()) {
        lines.push(format!("PostUp = {}", clean_command_field(post_up)));
    }
    if let Some(post_down) = non_empty(instance.post_down.as_deref()) {
        lines.push(format!("PostDown = {}", clean_command_field(post_down)));
    }

    for (peer, allowed_ips) in peers {
        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("PublicKey = {}", peer.public_key));
        if let Some(preshared_key) = &peer.preshared_key {
            lines.push(format!("PresharedKey = {}", preshared_key));
        }
        lines.push(format!(
            "PersistentKeepalive = {}",
            peer.persistent_keepalive
        ));

        let mut sorted: Vec<&PeerAllowedIP> = allowed_ips.iter().collect();
        sorted.sort_by_key(|ip| (ip.priority, ip.created_at, ip.id));
        let joined = sorted
            .iter()
            .map(|ip| format!("{}/{}", ip.allowed_ip, ip.netmask))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("AllowedIPs = {}", joined));
    }

    let mut config = lines.join("\n");
    config.push('\n');
    config
}

/// Sanitize a free-text shell snippet before it lands in a config file:
/// collapse any run of CR/LF into `"; "`, then strip remaining ASCII
/// control characters. The snippet is later interpreted by `wg-quick`, so
/// multi-line payloads must not survive.
pub fn clean_command_field(field: &str) -> String {
    let mut cleaned = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' | '\n' => {
                while matches!(chars.peek(), Some('\r' | '\n')) {
                    chars.next();
                }
                cleaned.push_str("; ");
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7F => {}
            c => cleaned.push(c),
        }
    }
    cleaned
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::super::db::fixtures;
    use super::*;

    #[test]
    fn test_peer_config_uses_priority_zero_address() {
        let instance = fixtures::instance(0);
        let peer = fixtures::peer(instance.id, "laptop");
        let ips = vec![
            fixtures::allowed_ip(peer.id, "192.168.1.0", 24, 2),
            fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0),
            fixtures::allowed_ip(peer.id, "172.16.0.0", 16, 1),
        ];

        let config = render_peer_config(&instance, &peer, &ips).unwrap();
        assert!(config.contains("Address = 10.0.0.2/32"));
        // The client peer block carries only the catch-all, never the
        // per-peer route list.
        assert!(config.contains("AllowedIPs = 0.0.0.0/0, ::/0"));
        assert!(!config.contains("192.168.1.0"));
    }

    #[test]
    fn test_peer_config_end_to_end_fixture() {
        let instance = fixtures::instance(0);
        let peer = fixtures::peer(instance.id, "laptop");
        let ips = vec![fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0)];

        let config = render_peer_config(&instance, &peer, &ips).unwrap();
        assert!(config.contains("PrivateKey = PK1"));
        assert!(config.contains("Address = 10.0.0.2/32"));
        assert!(config.contains("DNS = 8.8.8.8"));
        assert!(config.contains("Endpoint = vpn.example.com:51820"));
        assert!(config.contains("AllowedIPs = 0.0.0.0/0, ::/0"));
        assert!(config.contains("PersistentKeepalive = 25"));
        // Omit policy: absent pre-shared key produces no line at all.
        assert!(!config.contains("PresharedKey"));
        for line in config.lines() {
            assert!(!line.ends_with("= "), "dangling blank value: {:?}", line);
        }
    }

    #[test]
    fn test_peer_config_missing_priority_zero() {
        let instance = fixtures::instance(0);
        let peer = fixtures::peer(instance.id, "laptop");
        let ips = vec![fixtures::allowed_ip(peer.id, "192.168.1.0", 24, 1)];

        let err = render_peer_config(&instance, &peer, &ips).unwrap_err();
        assert_eq!(err, RenderError::MissingPriorityZeroIp { peer: peer.id });
    }

    #[test]
    fn test_peer_config_without_private_key() {
        let instance = fixtures::instance(0);
        let mut peer = fixtures::peer(instance.id, "laptop");
        peer.private_key = None;
        let ips = vec![fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0)];

        let config = render_peer_config(&instance, &peer, &ips).unwrap();
        assert!(!config.contains("PrivateKey"));
        assert!(config.starts_with("[Interface]\nAddress = 10.0.0.2/32\n"));
    }

    #[test]
    fn test_peer_config_with_preshared_key() {
        let instance = fixtures::instance(0);
        let mut peer = fixtures::peer(instance.id, "laptop");
        peer.preshared_key = Some("PSK1".to_string());
        let ips = vec![fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0)];

        let config = render_peer_config(&instance, &peer, &ips).unwrap();
        assert!(config.contains("PresharedKey = PSK1"));
    }

    #[test]
    fn test_instance_config_allowed_ips_ascending_priority() {
        let instance = fixtures::instance(0);
        let peer = fixtures::peer(instance.id, "laptop");
        let ips = vec![
            fixtures::allowed_ip(peer.id, "192.168.1.0", 24, 2),
            fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0),
            fixtures::allowed_ip(peer.id, "172.16.0.0", 16, 1),
        ];

        let config = render_instance_config(&instance, &[(peer, ips)]);
        assert!(config
            .contains("AllowedIPs = 10.0.0.2/32, 172.16.0.0/16, 192.168.1.0/24"));
    }

    #[test]
    fn test_instance_config_interface_section() {
        let mut instance = fixtures::instance(3);
        instance.post_up = Some("iptables -A FORWARD -i wg3 -j ACCEPT".to_string());
        instance.post_down = Some("iptables -D FORWARD -i wg3 -j ACCEPT".to_string());

        let config = render_instance_config(&instance, &[]);
        assert!(config.contains("PrivateKey = SRVPRIV"));
        assert!(config.contains("Address = 10.0.0.1/24"));
        assert!(config.contains("ListenPort = 51820"));
        assert!(config.contains("PostUp = iptables -A FORWARD -i wg3 -j ACCEPT"));
        assert!(config.contains("PostDown = iptables -D FORWARD -i wg3 -j ACCEPT"));
    }

    #[test]
    fn test_instance_config_omits_empty_hooks() {
        let instance = fixtures::instance(0);
        let config = render_instance_config(&instance, &[]);
        assert!(!config.contains("PostUp"));
        assert!(!config.contains("PostDown"));
    }

    #[test]
    fn test_instance_config_sanitizes_hooks() {
        let mut instance = fixtures::instance(0);
        instance.post_up = Some("echo hi\r\nrm -rf /\n".to_string());

        let config = render_instance_config(&instance, &[]);
        let post_up_line = config
            .lines()
            .find(|l| l.starts_with("PostUp"))
            .unwrap()
            .to_string();
        assert_eq!(post_up_line, "PostUp = echo hi; rm -rf /; ");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let instance = fixtures::instance(0);
        let peer = fixtures::peer(instance.id, "laptop");
        let ips = vec![
            fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0),
            fixtures::allowed_ip(peer.id, "172.16.0.0", 16, 1),
        ];

        let peers = vec![(peer.clone(), ips.clone())];
        assert_eq!(
            render_instance_config(&instance, &peers),
            render_instance_config(&instance, &peers)
        );
        assert_eq!(
            render_peer_config(&instance, &peer, &ips).unwrap(),
            render_peer_config(&instance, &peer, &ips).unwrap()
        );
    }

    #[test]
    fn test_clean_command_field() {
        assert_eq!(clean_command_field("a\nb"), "a; b");
        assert_eq!(clean_command_field("a\r\n\r\nb"), "a; b");
        assert_eq!(clean_command_field("plain command"), "plain command");

        let cleaned = clean_command_field("PostUp: echo hi\r\nrm -rf /\n");
        assert!(!cleaned.contains('\r'));
        assert!(!cleaned.contains('\n'));
        assert!(cleaned.chars().all(|c| (c as u32) >= 0x20 && c as u32 != 0x7F));
    }

    #[test]
    fn test_clean_command_field_strips_controls() {
        assert_eq!(clean_command_field("a\x00b\x1fc\x7fd"), "abcd");
    }
}
