use gesture_link::{ConnectionManager, NotificationBridge};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let manager = ConnectionManager::from_env()
        .map_err(|err| {
            println!("Invalid config: {}", err);
            std::process::exit(1);
        })
        .unwrap();

    let bridge = NotificationBridge::new(manager);

    log::info!("Initial state: {}", bridge.connection_state());

    let _gestures = bridge.on_gesture(|gesture| {
        log::info!("Gesture {} by {:?} hand", gesture.name, gesture.hand);
    });

    let endpoint = bridge.manager().endpoint().to_string();
    let _states = bridge.on_connection_state(move |json| log::info!("State: {}", json));

    let manager = bridge.manager().clone();
    manager.on_state_change(move |event| {
        if event.needs_attention(3) {
            log::warn!("Still not connected, check that the service is running at {}", endpoint);
        }
    });

    manager.connect();

    tokio::signal::ctrl_c().await.unwrap();

    manager.disconnect();
}
