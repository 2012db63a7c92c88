//! Routing labels and compose file for a published game.

use std::collections::HashMap;

/// Image serving published builds.
pub const SERVER_IMAGE: &str = "nginx:alpine";

/// Docker network Traefik routes on.
pub const TRAEFIK_NETWORK: &str = "traefik";

/// Traefik labels routing `<name>.<domain>` to the game container.
pub fn traefik_labels(name: &str, domain: &str) -> HashMap<String, String> {
    let host = format!("{name}.{domain}");
    HashMap::from([
        ("traefik.enable".to_string(), "true".to_string()),
        (
            format!("traefik.http.routers.{name}.rule"),
            format!("Host(`{host}`)"),
        ),
        (
            format!("traefik.http.routers.{name}.tls.certresolver"),
            "letsencrypt".to_string(),
        ),
    ])
}

/// `docker-compose.yml` equivalent of the container the deployer starts.
pub fn compose_file(name: &str, domain: &str) -> String {
    let host = format!("{name}.{domain}");
    format!(
        r#"services:
  web:
    image: {SERVER_IMAGE}
    volumes:
      - ./html:/usr/share/nginx/html:ro
    labels:
      - "traefik.enable=true"
      - "traefik.http.routers.{name}.rule=Host(`{host}`)"
      - "traefik.http.routers.{name}.tls.certresolver=letsencrypt"
    networks:
      - {TRAEFIK_NETWORK}
    restart: unless-stopped

networks:
  {TRAEFIK_NETWORK}:
    external: true
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_route_subdomain() {
        let labels = traefik_labels("gamedemo4", "example.com");
        assert_eq!(
            labels.get("traefik.http.routers.gamedemo4.rule").map(String::as_str),
            Some("Host(`gamedemo4.example.com`)")
        );
        assert_eq!(labels.get("traefik.enable").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_compose_file_mounts_html() {
        let compose = compose_file("gamedemo4", "example.com");
        assert!(compose.contains("image: nginx:alpine"));
        assert!(compose.contains("./html:/usr/share/nginx/html:ro"));
        assert!(compose.contains("Host(`gamedemo4.example.com`)"));
        assert!(compose.contains("external: true"));
    }
}
