//! Program, version and procedure catalog.
//!
//! A [`Program`] is declared once as a schema: versions, and for each version
//! its procedures with their argument and result descriptors. Handlers are
//! bound afterwards with [`Program::on_call`], so the same schema can be
//! cloned and hosted by several servers with different handlers. Once bound,
//! programs are frozen into a [`Registry`] which routes incoming calls.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use super::context::CallContext;
use super::fault::RpcError;
use crate::protocol::xdr::{Type, Value};

/// Number of the procedure every version answers without a handler.
pub const NULL_PROCEDURE: u32 = 0;

/// User code serving one procedure.
///
/// Implemented for any `Fn(Value, CallContext) -> impl Future<Output =
/// Result<Value, RpcError>>`, so async closures can be bound directly.
pub trait Handler: Send + Sync {
    fn call(&self, args: Value, context: CallContext) -> BoxFuture<'static, Result<Value, RpcError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    fn call(&self, args: Value, context: CallContext) -> BoxFuture<'static, Result<Value, RpcError>> {
        self(args, context).boxed()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("program {program} has no version {version}")]
    UnknownVersion { program: u32, version: u32 },
    #[error("program {program} version {version} has no procedure {name}")]
    UnknownProcedure { program: u32, version: u32, name: String },
}

/// One remote operation: its number, name and wire types, plus the handler.
#[derive(Clone)]
pub struct Procedure {
    number: u32,
    name: String,
    args: Type,
    result: Type,
    handler: Option<Arc<dyn Handler>>,
}

impl Procedure {
    pub fn new(number: u32, name: impl Into<String>, args: impl Into<Type>, result: impl Into<Type>) -> Self {
        Self { number, name: name.into(), args: args.into(), result: result.into(), handler: None }
    }

    fn null() -> Self {
        let mut null = Self::new(NULL_PROCEDURE, "NULL", Type::Void, Type::Void);
        null.handler = Some(Arc::new(|_: Value, _: CallContext| async { Ok::<_, RpcError>(Value::Void) }));
        null
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &Type {
        &self.args
    }

    pub fn result(&self) -> &Type {
        &self.result
    }

    pub fn is_bound(&self) -> bool {
        self.handler.is_some()
    }

    /// Decodes `args`, runs the handler and encodes its result.
    ///
    /// Arguments are decoded before the handler is looked at, so undecodable
    /// arguments are `GARBAGE_ARGS` whether or not a handler is bound.
    ///
    /// A result that does not fit the result descriptor is a schema bug; it is
    /// logged and the request dropped rather than answered with a partial reply.
    pub async fn invoke(&self, args: &[u8], context: CallContext) -> Result<Vec<u8>, RpcError> {
        let args = self.args.from_bytes(args).map_err(|e| {
            debug!("garbage arguments for {}: {}", self.name, e);
            RpcError::garbage_arguments()
        })?;
        let Some(handler) = &self.handler else {
            debug!("procedure {} has no handler", self.name);
            return Err(RpcError::procedure_unavailable());
        };
        let result = handler.call(args, context).await?;
        self.result.to_bytes(&result).map_err(|e| {
            error!("failed to encode result of {}: {}", self.name, e);
            RpcError::IgnoreRequest
        })
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("number", &self.number)
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// One revision of a program. The NULL procedure is always present.
#[derive(Clone, Debug)]
pub struct Version {
    number: u32,
    procedures: BTreeMap<u32, Procedure>,
    names: HashMap<String, u32>,
}

impl Version {
    pub fn new(number: u32) -> Self {
        let mut version = Self { number, procedures: BTreeMap::new(), names: HashMap::new() };
        version.insert(Procedure::null());
        version
    }

    /// Declares a procedure.
    pub fn procedure(
        mut self,
        number: u32,
        name: impl Into<String>,
        args: impl Into<Type>,
        result: impl Into<Type>,
    ) -> Self {
        self.insert(Procedure::new(number, name, args, result));
        self
    }

    fn insert(&mut self, procedure: Procedure) {
        self.names.insert(procedure.name.clone(), procedure.number);
        self.procedures.insert(procedure.number, procedure);
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn get(&self, number: u32) -> Option<&Procedure> {
        self.procedures.get(&number)
    }

    pub fn lookup(&self, name: &str) -> Option<&Procedure> {
        self.names.get(name).and_then(|number| self.procedures.get(number))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        let number = self.names.get(name)?;
        self.procedures.get_mut(number)
    }

    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }
}

/// A remote program: a number and its versions.
///
/// `Clone` is a deep copy, so binding handlers on a clone leaves the
/// original untouched.
#[derive(Clone, Debug)]
pub struct Program {
    number: u32,
    name: String,
    versions: BTreeMap<u32, Version>,
}

impl Program {
    pub fn new(name: impl Into<String>, number: u32) -> Self {
        Self { number, name: name.into(), versions: BTreeMap::new() }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.versions.insert(version.number, version);
        self
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, version: u32) -> Option<&Version> {
        self.versions.get(&version)
    }

    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.values()
    }

    /// Lowest registered version, 0 for a program without versions.
    pub fn low(&self) -> u32 {
        self.versions.keys().next().copied().unwrap_or(0)
    }

    /// Highest registered version, 0 for a program without versions.
    pub fn high(&self) -> u32 {
        self.versions.keys().next_back().copied().unwrap_or(0)
    }

    /// Binds `handler` to the procedure called `name` in `version`.
    pub fn on_call<F, Fut>(&mut self, version: u32, name: &str, handler: F) -> Result<(), BindError>
    where
        F: Fn(Value, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let program = self.number;
        let Some(v) = self.versions.get_mut(&version) else {
            return Err(BindError::UnknownVersion { program, version });
        };
        let Some(procedure) = v.lookup_mut(name) else {
            return Err(BindError::UnknownProcedure { program, version, name: name.to_string() });
        };
        procedure.handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Builder form of [`Program::on_call`].
    pub fn with_handler<F, Fut>(mut self, version: u32, name: &str, handler: F) -> Result<Self, BindError>
    where
        F: Fn(Value, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.on_call(version, name, handler)?;
        Ok(self)
    }

    /// Routes a call to one of this program's procedures.
    pub async fn call(&self, version: u32, procedure: u32, args: &[u8], context: CallContext) -> Result<Vec<u8>, RpcError> {
        let Some(v) = self.versions.get(&version) else {
            debug!("{} has no version {} (supported {}..={})", self.name, version, self.low(), self.high());
            return Err(RpcError::program_mismatch(self.low(), self.high()));
        };
        let Some(p) = v.get(procedure) else {
            debug!("{} version {} has no procedure {}", self.name, version, procedure);
            return Err(RpcError::procedure_unavailable());
        };
        p.invoke(args, context).await
    }
}

/// Programs hosted by one server, read-only once built.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    programs: HashMap<u32, Arc<Program>>,
}

impl Registry {
    /// Freezes `programs`. Procedures left without a handler are reported
    /// and answer `PROC_UNAVAIL`. When two programs share a number the first
    /// one is kept and the later one is reported and dropped.
    pub fn new(programs: impl IntoIterator<Item = Program>) -> Self {
        let mut registry: HashMap<u32, Arc<Program>> = HashMap::new();
        for program in programs {
            if let Some(existing) = registry.get(&program.number) {
                warn!(
                    "program {} ({}) is already registered as {}, ignoring it",
                    program.name, program.number, existing.name
                );
                continue;
            }
            for version in program.versions() {
                for procedure in version.procedures().filter(|p| !p.is_bound()) {
                    warn!(
                        "{} version {} procedure {} ({}) has no handler",
                        program.name,
                        version.number,
                        procedure.name,
                        procedure.number
                    );
                }
            }
            registry.insert(program.number, Arc::new(program));
        }
        Self { programs: registry }
    }

    pub fn get(&self, program: u32) -> Option<&Arc<Program>> {
        self.programs.get(&program)
    }

    pub fn programs(&self) -> impl Iterator<Item = &Arc<Program>> {
        self.programs.values()
    }

    /// Routes a call and returns the encoded result.
    pub async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
        context: CallContext,
    ) -> Result<Vec<u8>, RpcError> {
        let Some(p) = self.programs.get(&program) else {
            debug!("unknown RPC program number {}", program);
            return Err(RpcError::program_unavailable());
        };
        p.call(version, procedure, args, context).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::protocol::rpc::context::Protocol;

    fn context() -> CallContext {
        CallContext::new(SocketAddr::from(([127, 0, 0, 1], 700)), 0, Protocol::Udp)
    }

    fn echo_program() -> Program {
        Program::new("ECHO", 300)
            .version(Version::new(1).procedure(1, "ECHO", Type::UInt, Type::UInt))
            .version(Version::new(3).procedure(1, "ECHO", Type::UInt, Type::UInt))
    }

    #[tokio::test]
    async fn null_procedure_is_implicit() {
        let registry = Registry::new([echo_program()]);
        let reply = registry.call(300, 1, NULL_PROCEDURE, &[], context()).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn unbound_procedure_is_unavailable() {
        let registry = Registry::new([echo_program()]);
        let err = registry.call(300, 1, 1, &[0, 0, 0, 1], context()).await.unwrap_err();
        assert_eq!(err, RpcError::procedure_unavailable());
    }

    #[tokio::test]
    async fn unbound_procedure_decodes_arguments_first() {
        let registry = Registry::new([echo_program()]);
        let err = registry.call(300, 1, 1, &[0, 1], context()).await.unwrap_err();
        assert_eq!(err, RpcError::garbage_arguments());
    }

    #[tokio::test]
    async fn duplicate_program_number_keeps_the_first() {
        let mut first = echo_program();
        first.on_call(1, "ECHO", |args: Value, _: CallContext| async move { Ok(args) }).unwrap();
        let second = Program::new("OTHER", 300).version(Version::new(7));

        let registry = Registry::new([first, second]);
        assert_eq!(registry.programs().count(), 1);
        assert_eq!(registry.get(300).map(|p| p.name()), Some("ECHO"));
        assert_eq!(registry.call(300, 1, 1, &[0, 0, 0, 5], context()).await, Ok(vec![0, 0, 0, 5]));
    }

    #[tokio::test]
    async fn version_mismatch_reports_bounds() {
        let registry = Registry::new([echo_program()]);
        let err = registry.call(300, 2, 1, &[], context()).await.unwrap_err();
        assert_eq!(err, RpcError::program_mismatch(1, 3));
    }

    #[tokio::test]
    async fn short_arguments_are_garbage() {
        let mut program = echo_program();
        program.on_call(1, "ECHO", |args: Value, _: CallContext| async move { Ok(args) }).unwrap();
        let registry = Registry::new([program]);
        let err = registry.call(300, 1, 1, &[0, 0], context()).await.unwrap_err();
        assert_eq!(err, RpcError::garbage_arguments());
    }

    #[tokio::test]
    async fn unencodable_result_drops_the_request() {
        let mut program = echo_program();
        program
            .on_call(1, "ECHO", |_: Value, _: CallContext| async { Ok(Value::from("not a number")) })
            .unwrap();
        let registry = Registry::new([program]);
        let err = registry.call(300, 1, 1, &[0, 0, 0, 1], context()).await.unwrap_err();
        assert_eq!(err, RpcError::IgnoreRequest);
    }

    #[test]
    fn clones_bind_independently() {
        let schema = echo_program();
        let mut bound = schema.clone();
        bound.on_call(1, "ECHO", |args: Value, _: CallContext| async move { Ok(args) }).unwrap();
        assert!(bound.get(1).unwrap().lookup("ECHO").unwrap().is_bound());
        assert!(!schema.get(1).unwrap().lookup("ECHO").unwrap().is_bound());
    }

    #[test]
    fn binding_unknown_names_fails() {
        let mut program = echo_program();
        let handler = |args: Value, _: CallContext| async move { Ok::<_, RpcError>(args) };
        assert!(matches!(
            program.on_call(2, "ECHO", handler),
            Err(BindError::UnknownVersion { program: 300, version: 2 })
        ));
        assert!(matches!(
            program.on_call(1, "SHOUT", handler),
            Err(BindError::UnknownProcedure { .. })
        ));
    }
}
