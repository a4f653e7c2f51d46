// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! An in-process CQL node speaking protocol v4 over `tokio::io::duplex`.
//!
//! Each node answers the handshake, REGISTER and PREPARE on its own. QUERY and EXECUTE are
//! answered from a script of [`Reply`]s shared by every connection to the node, with a VOID
//! result once the script runs dry.

#![allow(dead_code)]

use async_trait::async_trait;
use maplit::hashmap;
use scylla_core::{
    app::{
        config::{
            ClientConfig,
            PoolConfig,
        },
        host::Host,
        policy::{
            ConstantReconnectionPolicy,
            LoadBalancingPolicy,
            QueryPlan,
        },
        session::{
            Session,
            SessionBuilder,
        },
        statement::Statement,
    },
    cql::{
        connection::{
            handshake,
            Connection,
            ConnectionError,
            ConnectionOptions,
            Connector,
        },
        frame::{
            opcode,
            write_bytes,
            write_int,
            write_short,
            write_short_bytes,
            write_string,
            write_string_multimap,
            Consistency,
            ErrorCode,
            FromPayload,
            Header,
            ProtocolVersion,
            RequestBody,
            RequestFrame,
            ToPayload,
            Value,
        },
        types::DataType,
    },
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU32,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
        DuplexStream,
    },
    sync::mpsc,
};

const VERSION: ProtocolVersion = ProtocolVersion::V4;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How a node answers one QUERY or EXECUTE.
#[derive(Clone, Debug)]
pub enum Reply {
    Void,
    Rows {
        columns: Vec<(&'static str, DataType)>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        paging_state: Option<Vec<u8>>,
    },
    Error(ErrorCode, &'static str),
    WriteTimeout {
        received: i32,
        write_type: &'static str,
    },
    ReadTimeout {
        received: i32,
        block_for: i32,
    },
    Unavailable {
        alive: i32,
    },
    SchemaChange {
        change: &'static str,
        keyspace: &'static str,
        table: &'static str,
    },
    Delayed(Duration, Box<Reply>),
    /// Never answer.
    Silence,
    /// Close the connection instead of answering.
    Close,
}

impl Reply {
    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

/// A QUERY, PREPARE or EXECUTE the node received.
#[derive(Clone, Debug)]
pub struct Received {
    pub opcode: u8,
    pub query: String,
    pub consistency: Option<Consistency>,
    pub values: Vec<Value>,
}

#[derive(Debug)]
struct Definition {
    keyspace: String,
    table: String,
    markers: Vec<(String, DataType)>,
}

#[derive(Debug)]
pub struct MockNode {
    pub address: SocketAddr,
    reachable: AtomicBool,
    script: Mutex<VecDeque<Reply>>,
    definitions: Mutex<HashMap<String, Definition>>,
    prepared: Mutex<HashMap<Vec<u8>, String>>,
    generation: AtomicU32,
    received: Mutex<Vec<Received>>,
    connections: AtomicUsize,
    connect_delay: Mutex<Duration>,
    /// Writers of the connections which registered for events.
    listeners: Mutex<Vec<mpsc::UnboundedSender<Option<Vec<u8>>>>>,
}

impl MockNode {
    fn new(address: SocketAddr) -> Self {
        Self {
            address,
            reachable: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            definitions: Mutex::new(HashMap::new()),
            prepared: Mutex::new(HashMap::new()),
            generation: AtomicU32::new(0),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Queue the answer to the next QUERY or EXECUTE.
    pub fn reply(&self, reply: Reply) -> &Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Declare the bind markers PREPARE reports for `query`. Undeclared queries get one `int`
    /// marker per `?`, against `ks.t`.
    pub fn define(&self, query: &str, keyspace: &str, table: &str, markers: Vec<(&str, DataType)>) {
        self.definitions.lock().unwrap().insert(
            query.to_string(),
            Definition {
                keyspace: keyspace.to_string(),
                table: table.to_string(),
                markers: markers.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
            },
        );
    }

    /// Forget every prepared statement, as a restarted node would. Preparing again yields new ids.
    pub fn forget_prepared(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.prepared.lock().unwrap().clear();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every later connection attempt take `delay` before it is accepted or refused.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// REGISTER frames received.
    pub fn registrations(&self) -> usize {
        self.received().iter().filter(|r| r.opcode == opcode::REGISTER).count()
    }

    /// Push a table schema change to every open connection registered for events. Returns
    /// how many connections it was written to.
    pub fn push_schema_change(&self, change: &str, keyspace: &str, table: &str) -> usize {
        let mut body = Vec::new();
        for item in &["SCHEMA_CHANGE", change, "TABLE", keyspace, table] {
            write_string(item, &mut body);
        }
        let event = frame(-1, opcode::EVENT, body);
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|tx| tx.send(Some(event.clone())).is_ok());
        listeners.len()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// QUERY and EXECUTE frames received.
    pub fn executions(&self) -> usize {
        self.received()
            .iter()
            .filter(|r| r.opcode == opcode::QUERY || r.opcode == opcode::EXECUTE)
            .count()
    }

    pub fn prepares(&self) -> usize {
        self.received().iter().filter(|r| r.opcode == opcode::PREPARE).count()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn prepared_id(&self, query: &str) -> Vec<u8> {
        let salted = format!("{}#{}", self.generation.load(Ordering::SeqCst), query);
        md5::compute(salted.as_bytes()).0.to_vec()
    }

    fn record(&self, opcode: u8, query: &str, consistency: Option<Consistency>, values: Vec<Value>) {
        self.received.lock().unwrap().push(Received {
            opcode,
            query: query.to_string(),
            consistency,
            values,
        });
    }

    fn next_reply(&self) -> Reply {
        self.script.lock().unwrap().pop_front().unwrap_or(Reply::Void)
    }

    async fn serve(self: Arc<Self>, io: DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(io);
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Vec<u8>>>();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    Some(frame) => {
                        if writer.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        writer.shutdown().await.ok();
                        break;
                    }
                }
            }
        });
        loop {
            let mut frame = vec![0; VERSION.header_len()];
            if reader.read_exact(&mut frame).await.is_err() {
                return;
            }
            let header = Header::from_payload(&mut 0, &frame).unwrap();
            let mut body = vec![0; header.body_len() as usize];
            if reader.read_exact(&mut body).await.is_err() {
                return;
            }
            frame.extend(body);
            let request = RequestFrame::decode(&frame).unwrap();
            let node = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move { node.answer(request, tx).await });
        }
    }

    async fn answer(&self, request: RequestFrame, tx: mpsc::UnboundedSender<Option<Vec<u8>>>) {
        let stream = request.stream();
        let reply = match request.body() {
            RequestBody::Options(_) => {
                let mut body = Vec::new();
                write_string_multimap(
                    &hashmap! {
                        "CQL_VERSION".to_string() => vec!["3.4.5".to_string()],
                        "COMPRESSION".to_string() => vec![],
                    },
                    &mut body,
                );
                (opcode::SUPPORTED, body)
            }
            RequestBody::Register(_) => {
                self.record(opcode::REGISTER, "", None, Vec::new());
                self.listeners.lock().unwrap().push(tx.clone());
                (opcode::READY, Vec::new())
            }
            RequestBody::Startup(_) | RequestBody::AuthResponse(_) => (opcode::READY, Vec::new()),
            RequestBody::Prepare(prepare) => {
                self.record(opcode::PREPARE, prepare.statement(), None, Vec::new());
                (opcode::RESULT, self.prepare(prepare.statement()))
            }
            RequestBody::Query(query) => {
                let parameters = query.parameters();
                self.record(
                    opcode::QUERY,
                    query.statement(),
                    Some(parameters.consistency()),
                    parameters.values().iter().map(|(_, v)| v.clone()).collect(),
                );
                match self.scripted(self.next_reply(), &tx).await {
                    Some(reply) => reply,
                    None => return,
                }
            }
            RequestBody::Execute(execute) => {
                let known = self.prepared.lock().unwrap().get(execute.id()).cloned();
                match known {
                    Some(query) => {
                        let parameters = execute.parameters();
                        self.record(
                            opcode::EXECUTE,
                            &query,
                            Some(parameters.consistency()),
                            parameters.values().iter().map(|(_, v)| v.clone()).collect(),
                        );
                        match self.scripted(self.next_reply(), &tx).await {
                            Some(reply) => reply,
                            None => return,
                        }
                    }
                    None => {
                        let mut body = error_body(ErrorCode::Unprepared, "Unknown prepared statement");
                        write_short_bytes(execute.id(), &mut body);
                        (opcode::ERROR, body)
                    }
                }
            }
        };
        tx.send(Some(frame(stream, reply.0, reply.1))).ok();
    }

    /// Resolve delays and connection level replies. `None` when nothing is to be sent.
    async fn scripted(
        &self,
        mut reply: Reply,
        tx: &mpsc::UnboundedSender<Option<Vec<u8>>>,
    ) -> Option<(u8, Vec<u8>)> {
        while let Reply::Delayed(delay, next) = reply {
            tokio::time::sleep(delay).await;
            reply = *next;
        }
        match reply {
            Reply::Silence => None,
            Reply::Close => {
                tx.send(None).ok();
                None
            }
            reply => Some(encode(&reply)),
        }
    }

    fn prepare(&self, query: &str) -> Vec<u8> {
        let id = self.prepared_id(query);
        self.prepared.lock().unwrap().insert(id.clone(), query.to_string());
        let definitions = self.definitions.lock().unwrap();
        let (keyspace, table, markers) = match definitions.get(query) {
            Some(d) => (d.keyspace.clone(), d.table.clone(), d.markers.clone()),
            None => (
                "ks".to_string(),
                "t".to_string(),
                (0..query.matches('?').count())
                    .map(|i| (format!("v{}", i), DataType::Int))
                    .collect(),
            ),
        };
        let mut body = Vec::new();
        write_int(0x0004, &mut body);
        write_short_bytes(&id, &mut body);
        // Bound variables, with a global table spec
        write_int(if markers.is_empty() { 0 } else { 0x0001 }, &mut body);
        write_int(markers.len() as i32, &mut body);
        write_int(if markers.is_empty() { 0 } else { 1 }, &mut body);
        if !markers.is_empty() {
            write_short(0, &mut body);
            write_string(&keyspace, &mut body);
            write_string(&table, &mut body);
        }
        for (name, data_type) in markers.iter() {
            write_string(name, &mut body);
            write_type(data_type, &mut body);
        }
        // No result metadata
        write_int(0x0004, &mut body);
        write_int(0, &mut body);
        body
    }
}

fn frame(stream: i16, opcode: u8, body: Vec<u8>) -> Vec<u8> {
    let mut header = Header::response(VERSION, opcode);
    header.set_stream(stream);
    header.set_body_len(body.len() as u32);
    let mut payload = Vec::new();
    header.to_payload(&mut payload);
    payload.extend(body);
    payload
}

fn write_type(data_type: &DataType, body: &mut Vec<u8>) {
    write_short(data_type.id(), body);
    match data_type {
        DataType::Custom(class) => write_string(class, body),
        DataType::List(element) | DataType::Set(element) => write_type(element, body),
        DataType::Map(key, value) => {
            write_type(key, body);
            write_type(value, body);
        }
        _ => (),
    }
}

fn error_body(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    write_int(code as i32, &mut body);
    write_string(message, &mut body);
    body
}

fn encode(reply: &Reply) -> (u8, Vec<u8>) {
    match reply {
        Reply::Void | Reply::Silence | Reply::Close | Reply::Delayed(..) => {
            let mut body = Vec::new();
            write_int(0x0001, &mut body);
            (opcode::RESULT, body)
        }
        Reply::Rows {
            columns,
            rows,
            paging_state,
        } => {
            let mut body = Vec::new();
            write_int(0x0002, &mut body);
            let flags = 0x0001 | if paging_state.is_some() { 0x0002 } else { 0 };
            write_int(flags, &mut body);
            write_int(columns.len() as i32, &mut body);
            if let Some(paging_state) = paging_state {
                write_bytes(paging_state, &mut body);
            }
            write_string("ks", &mut body);
            write_string("t", &mut body);
            for (name, data_type) in columns {
                write_string(name, &mut body);
                write_type(data_type, &mut body);
            }
            write_int(rows.len() as i32, &mut body);
            for row in rows {
                for cell in row {
                    match cell {
                        Some(bytes) => write_bytes(bytes, &mut body),
                        None => write_int(-1, &mut body),
                    }
                }
            }
            (opcode::RESULT, body)
        }
        Reply::Error(code, message) => (opcode::ERROR, error_body(*code, message)),
        Reply::WriteTimeout { received, write_type } => {
            let mut body = error_body(ErrorCode::WriteTimeout, "Operation timed out");
            write_short(Consistency::Quorum as u16, &mut body);
            write_int(*received, &mut body);
            write_int(2, &mut body);
            write_string(write_type, &mut body);
            (opcode::ERROR, body)
        }
        Reply::ReadTimeout { received, block_for } => {
            let mut body = error_body(ErrorCode::ReadTimeout, "Operation timed out");
            write_short(Consistency::Quorum as u16, &mut body);
            write_int(*received, &mut body);
            write_int(*block_for, &mut body);
            body.push(0);
            (opcode::ERROR, body)
        }
        Reply::Unavailable { alive } => {
            let mut body = error_body(ErrorCode::UnavailableException, "Cannot achieve consistency");
            write_short(Consistency::Quorum as u16, &mut body);
            write_int(2, &mut body);
            write_int(*alive, &mut body);
            (opcode::ERROR, body)
        }
        Reply::SchemaChange {
            change,
            keyspace,
            table,
        } => {
            let mut body = Vec::new();
            write_int(0x0005, &mut body);
            write_string(change, &mut body);
            write_string("TABLE", &mut body);
            write_string(keyspace, &mut body);
            write_string(table, &mut body);
            (opcode::RESULT, body)
        }
    }
}

/// A set of mock nodes, reachable through the [`Connector`] it implements.
#[derive(Debug)]
pub struct MockCluster {
    nodes: Vec<Arc<MockNode>>,
}

impl MockCluster {
    /// Nodes listen on 127.0.0.1, 127.0.0.2 and so on.
    pub fn new(size: u8) -> Arc<Self> {
        Arc::new(Self {
            nodes: (1..=size)
                .map(|i| Arc::new(MockNode::new(SocketAddr::from(([127, 0, 0, i], 9042)))))
                .collect(),
        })
    }

    pub fn node(&self, index: usize) -> &Arc<MockNode> {
        &self.nodes[index]
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(|n| n.address).collect()
    }

    pub fn executions(&self) -> usize {
        self.nodes.iter().map(|n| n.executions()).sum()
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(&self, address: SocketAddr, options: &ConnectionOptions) -> Result<Connection, ConnectionError> {
        let refused = || std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "unreachable");
        let node = self
            .nodes
            .iter()
            .find(|n| n.address == address)
            .cloned()
            .ok_or_else(refused)?;
        let delay = *node.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !node.reachable.load(Ordering::SeqCst) {
            return Err(refused().into());
        }
        let (client, server) = tokio::io::duplex(1 << 20);
        node.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(node.clone().serve(server));
        let connection = Connection::new(address, client, options);
        handshake(&connection, options).await?;
        Ok(connection)
    }
}

/// Test defaults: short timeouts, no heartbeat, no background preparation.
pub fn config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(2),
        prepare_on_all_hosts: false,
        pool: PoolConfig {
            heartbeat_interval: None,
            borrow_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Plans every execution over the UP hosts in contact point order.
#[derive(Debug)]
pub struct InOrder;

impl LoadBalancingPolicy for InOrder {
    fn new_query_plan(&self, _statement: &Statement, hosts: Arc<Vec<Arc<Host>>>) -> QueryPlan {
        let hosts = hosts.iter().filter(|h| h.is_up()).cloned().collect::<Vec<_>>();
        Box::new(hosts.into_iter())
    }
}

/// A session over `cluster` whose query plans always start at the first node.
pub fn builder(cluster: &Arc<MockCluster>, config: ClientConfig) -> SessionBuilder {
    init_logger();
    Session::builder()
        .config(config)
        .contact_points(cluster.addresses())
        .connector(cluster.clone())
        .load_balancing(Arc::new(InOrder))
        .reconnection_policy(Arc::new(ConstantReconnectionPolicy::new(Duration::from_millis(50))))
}

pub async fn session(cluster: &Arc<MockCluster>) -> Session {
    builder(cluster, config()).build().await.unwrap()
}
