//! Pure connection configuration for the rumqttc transport
//!
//! Maps transport-agnostic [`ConnectOptions`] onto `rumqttc::MqttOptions`.

use crate::transport::{ConnectOptions, QoS, Scheme, TransportError};
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use url::Url;

/// Pure function to configure MQTT options from connect options
pub fn configure_mqtt_options(options: &ConnectOptions) -> Result<MqttOptions, TransportError> {
    let broker_url = options.url();
    let url = Url::parse(&broker_url)
        .map_err(|_| TransportError::InvalidAddress(broker_url.clone()))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::InvalidAddress(broker_url.clone()))?;

    // rumqttc panics on empty ids or ids with a leading space
    if options.client_id.is_empty() || options.client_id.starts_with(' ') {
        return Err(TransportError::InvalidClientId(options.client_id.clone()));
    }

    // WebSocket transports take the full URL in place of the host
    let broker = if options.scheme.is_websocket() {
        broker_url.clone()
    } else {
        host.to_string()
    };
    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), broker, options.port);

    match options.scheme {
        Scheme::Mqtt => {}
        Scheme::Mqtts => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        Scheme::Ws => {
            mqtt_options.set_transport(RumqttcTransport::Ws);
        }
        Scheme::Wss => {
            mqtt_options.set_transport(RumqttcTransport::Wss(TlsConfiguration::default()));
        }
    }

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.clone(), password);
    }

    mqtt_options.set_keep_alive(normalize_keep_alive(options.keep_alive));
    mqtt_options.set_clean_session(options.clean_session);

    Ok(mqtt_options)
}

/// rumqttc rejects sub-second keep-alives other than zero
fn normalize_keep_alive(keep_alive: Duration) -> Duration {
    if keep_alive.is_zero() || keep_alive >= Duration::from_secs(1) {
        keep_alive
    } else {
        Duration::from_secs(1)
    }
}

/// Map session QoS onto the rumqttc type
pub fn to_rumqttc_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}
