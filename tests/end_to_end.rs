//! Master and server talking over loopback TCP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use voltage_iec60870::{
    Asdu, Connection, ConnectionConfig, ConnectionParameters, ConnectionState, Cot,
    InformationElement, InformationObject, MeasuredScaled, QualityDescriptor, ScaledValue, Server,
    ServerConfig, ServerConnectionEvent, ServerConnectionHandle, TypeId, QOI_STATION,
};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(config: ServerConfig) -> Server {
    let mut server = Server::new(config.bind_address("127.0.0.1").port(0));
    server.start().await.unwrap();
    server
}

async fn connect_master(server: &Server) -> (Connection, mpsc::UnboundedReceiver<Asdu>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let port = server.local_addr().unwrap().port();
    let config = ConnectionConfig::new("127.0.0.1")
        .port(port)
        .asdu_handler(Arc::new(move |asdu: &Asdu| {
            let _ = tx.send(asdu.clone());
            true
        }));
    let mut connection = Connection::new(config);
    connection.connect().await.unwrap();
    timeout(WAIT, connection.wait_for_state(ConnectionState::ConnectedActive))
        .await
        .unwrap()
        .unwrap();
    (connection, rx)
}

async fn next_asdu(rx: &mut mpsc::UnboundedReceiver<Asdu>) -> Asdu {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

fn station_data(params: &ConnectionParameters, first: u32) -> Asdu {
    let mut asdu = Asdu::new(params, Cot::InterrogatedByStation, 1);
    for ioa in first..first + 4 {
        assert!(asdu.add_information_object(&InformationObject::new(
            ioa,
            InformationElement::MeasuredScaled(MeasuredScaled {
                value: ScaledValue::new(ioa as i32),
                quality: QualityDescriptor::default(),
            }),
        )));
    }
    asdu
}

#[tokio::test]
async fn test_interrogation_round_trip() {
    let config = ServerConfig::new().interrogation_handler(Arc::new(
        |conn: &ServerConnectionHandle, asdu: &Asdu, qoi: u8| {
            if qoi != QOI_STATION {
                return false;
            }
            conn.send_act_con(asdu, false).unwrap();
            for first in [100, 200, 300] {
                conn.send_asdu(station_data(asdu.parameters(), first)).unwrap();
            }
            conn.send_act_term(asdu).unwrap();
            true
        },
    ));
    let mut server = start_server(config).await;
    let (mut master, mut received) = connect_master(&server).await;

    master.send_test_command(1).await.unwrap();
    let test = next_asdu(&mut received).await;
    assert_eq!(test.type_id(), Some(TypeId::TestCommand));
    assert_eq!(test.cot(), Cot::ActivationConfirm);

    master
        .send_interrogation_command(Cot::Activation, 1, QOI_STATION)
        .await
        .unwrap();

    let con = next_asdu(&mut received).await;
    assert_eq!(con.type_id(), Some(TypeId::InterrogationCommand));
    assert_eq!(con.cot(), Cot::ActivationConfirm);
    assert!(!con.is_negative());

    for first in [100, 200, 300] {
        let data = next_asdu(&mut received).await;
        assert_eq!(data.type_id(), Some(TypeId::MeasuredScaled));
        assert_eq!(data.cot(), Cot::InterrogatedByStation);
        assert_eq!(data.number_of_elements(), 4);
        let io = data.element(0).unwrap();
        assert_eq!(io.address, first);
        match io.element {
            InformationElement::MeasuredScaled(value) => {
                assert_eq!(value.value.value(), first as i16)
            }
            other => panic!("unexpected element {:?}", other),
        }
    }

    let term = next_asdu(&mut received).await;
    assert_eq!(term.type_id(), Some(TypeId::InterrogationCommand));
    assert_eq!(term.cot(), Cot::ActivationTermination);

    let stats = master.statistics();
    assert_eq!(stats.sent_messages, 3);
    assert!(stats.received_messages >= 7);

    master.close().await;
    assert_eq!(master.state(), ConnectionState::Closed);
    server.stop().await;
}

#[tokio::test]
async fn test_single_active_connection() {
    let events: Arc<Mutex<Vec<(u64, ServerConnectionEvent)>>> = Arc::default();
    let sink = events.clone();
    let config = ServerConfig::new().connection_event_handler(Arc::new(
        move |conn: &ServerConnectionHandle, event| {
            sink.lock().unwrap().push((conn.id(), event));
        },
    ));
    let mut server = start_server(config).await;

    let (_first, mut first_rx) = connect_master(&server).await;
    let first_id = server.active_connection().unwrap().id();

    let (_second, mut second_rx) = connect_master(&server).await;
    let active = server.active_connection().unwrap();
    assert_ne!(active.id(), first_id);
    assert_eq!(server.open_connections(), 2);
    assert!(events
        .lock()
        .unwrap()
        .contains(&(first_id, ServerConnectionEvent::Deactivated)));

    server.enqueue_asdu(station_data(&ConnectionParameters::default(), 1));
    let data = next_asdu(&mut second_rx).await;
    assert_eq!(data.cot(), Cot::InterrogatedByStation);
    assert!(first_rx.try_recv().is_err());
    assert_eq!(server.queued_asdus(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_closes_masters() {
    let mut server = start_server(ServerConfig::new()).await;
    let (master, _rx) = connect_master(&server).await;

    server.stop().await;
    timeout(WAIT, master.wait_for_state(ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn test_connection_limit() {
    let mut server = start_server(ServerConfig::new().max_open_connections(1)).await;
    let (_first, _rx) = connect_master(&server).await;

    let port = server.local_addr().unwrap().port();
    let mut second = Connection::new(ConnectionConfig::new("127.0.0.1").port(port));
    second.connect().await.unwrap();
    timeout(WAIT, second.wait_for_state(ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.open_connections(), 1);

    server.stop().await;
}
