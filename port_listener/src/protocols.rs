use crate::id::*;

use std::net::SocketAddr;
use serde::{Serialize,Deserialize};
use strum::{
    Display,
    EnumIter,
    EnumString,
};
use tokio::{
    net::TcpStream,
    sync::OwnedSemaphorePermit,
};

/// The closed set of wire protocols a port can serve.
///
/// Parsing from the configuration string is the only place an unknown protocol
/// can appear.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,Serialize,Deserialize,Display,EnumString,EnumIter)]
pub enum Protocol
{
    #[strum(serialize = "graphql+http")]
    #[serde(rename = "graphql+http")]
    GraphQlHttp,
    #[strum(serialize = "edgeql+http")]
    #[serde(rename = "edgeql+http")]
    EdgeQlHttp,
    #[strum(serialize = "binary")]
    #[serde(rename = "binary")]
    Binary,
}

/// Database and user restrictions carried by a port.
#[derive(Clone,Debug,Default,PartialEq,Eq)]
pub struct PortScope
{
    pub database: Option<String>,
    pub user: Option<String>,
}

/// A client connection accepted by a running port, to be handed to the
/// protocol implementation.
///
/// The connection counts against its port's concurrency limit until this value,
/// or the permit taken from it, is dropped.
#[derive(Debug)]
pub struct AcceptedConnection
{
    pub port: PortId,
    pub protocol: Protocol,
    pub scope: PortScope,
    pub remote_addr: SocketAddr,
    pub stream: TcpStream,
    permit: OwnedSemaphorePermit,
}

impl AcceptedConnection
{
    pub(crate) fn new(port: PortId,
                      protocol: Protocol,
                      scope: PortScope,
                      remote_addr: SocketAddr,
                      stream: TcpStream,
                      permit: OwnedSemaphorePermit) -> Self
    {
        Self { port, protocol, scope, remote_addr, stream, permit }
    }

    /// Split into the stream and the concurrency slot it occupies.
    pub fn into_parts(self) -> (TcpStream, OwnedSemaphorePermit)
    {
        (self.stream, self.permit)
    }
}
