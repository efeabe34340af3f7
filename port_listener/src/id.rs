use serde::{Serialize,Deserialize};
use std::sync::atomic::{
    AtomicI64,
    Ordering,
};

/// Identifies one port instance for the lifetime of the process.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,PartialOrd,Ord,Serialize,Deserialize)]
pub struct PortId(i64);

impl PortId
{
    pub fn new(id: i64) -> Self
    {
        Self(id)
    }

    pub fn value(&self) -> i64
    {
        self.0
    }
}

impl std::fmt::Display for PortId
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        write!(f, "port#{}", self.0)
    }
}

/// Sequential generator for [`PortId`]s
#[derive(Debug)]
pub struct PortIdGenerator
{
    next: AtomicI64,
}

impl PortIdGenerator
{
    pub fn new(start: i64) -> Self
    {
        Self { next: AtomicI64::new(start) }
    }

    pub fn next(&self) -> PortId
    {
        PortId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PortIdGenerator
{
    fn default() -> Self
    {
        Self::new(1)
    }
}
