//! The embedding entry point.
//!
//! A [`Runner`] prepares a module once (overload selection, frame layouts,
//! builtin lowering, function pre-binding) and can then resolve and execute
//! an entry function. Command-line arguments drive overload scoring at
//! preparation time and are coerced to typed values when the entry is
//! called. Results cross back to the host as [`Object`] values.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    args::coerce_argument,
    builtins::{BuiltinRegistry, HostBuiltin},
    determinism::DeterminismContext,
    error::{RunError, RunResult},
    eval::{DEFAULT_MAX_CALL_DEPTH, Vm, call_closure},
    io::{PrintWriter, StdPrint},
    ir,
    object::Object,
    prepare::{PreparedModule, prepare},
    purity::PurityAnalyzer,
    tasks::TaskRegistry,
    value::Value,
};

/// A prepared module ready to execute entry functions.
pub struct Runner {
    prepared: PreparedModule,
    builtins: Arc<BuiltinRegistry>,
    purity: Arc<PurityAnalyzer>,
    determinism: Arc<Mutex<DeterminismContext>>,
    cli_args: Vec<String>,
    max_depth: usize,
}

impl Runner {
    /// Prepares `module` with the given command-line arguments. Retry
    /// jitter is recorded; see [`Runner::with_replay`] for reproduction.
    pub fn new(module: &ir::Module, args: Vec<String>) -> RunResult<Self> {
        Self::build(module, args, Vec::new(), DeterminismContext::record(rand::random()))
    }

    /// Deserializes and prepares a module from its JSON form.
    pub fn from_json(src: &str, args: Vec<String>) -> RunResult<Self> {
        let module = ir::Module::from_json(src)?;
        Self::new(&module, args)
    }

    /// Prepares `module` with additional host builtins registered before
    /// call lowering, so calls to them are recognized at load time.
    pub fn with_host_builtins(
        module: &ir::Module,
        args: Vec<String>,
        host_builtins: Vec<HostBuiltin>,
    ) -> RunResult<Self> {
        Self::build(module, args, host_builtins, DeterminismContext::record(rand::random()))
    }

    /// Prepares `module` in replay mode: retry jitter is consumed from a
    /// log recorded by a previous run, reproducing its backoff delays.
    pub fn with_replay(module: &ir::Module, args: Vec<String>, log: Vec<u64>) -> RunResult<Self> {
        Self::build(module, args, Vec::new(), DeterminismContext::replay(log))
    }

    fn build(
        module: &ir::Module,
        args: Vec<String>,
        host_builtins: Vec<HostBuiltin>,
        determinism: DeterminismContext,
    ) -> RunResult<Self> {
        let mut builtins = BuiltinRegistry::new();
        for builtin in host_builtins {
            builtins.register(builtin);
        }
        let purity = Arc::new(PurityAnalyzer::new());
        let prepared = prepare(module, &args, &builtins, &purity)?;
        Ok(Self {
            prepared,
            builtins: Arc::new(builtins),
            purity,
            determinism: Arc::new(Mutex::new(determinism)),
            cli_args: args,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
        })
    }

    /// Runs the named entry function, printing to stdout.
    pub fn run(&self, entry: &str) -> RunResult<Object> {
        self.run_with_printer(entry, Arc::new(StdPrint))
    }

    /// Runs the named entry function with a caller-supplied print writer.
    ///
    /// The entry's parameters are bound from the coerced command-line
    /// arguments; surplus arguments beyond the entry's parameter count are
    /// ignored, so a zero-parameter entry runs no matter what was passed on
    /// the command line. The effect context is seeded with the entry's
    /// declared effects.
    pub fn run_with_printer(&self, entry: &str, printer: Arc<dyn PrintWriter>) -> RunResult<Object> {
        let Some(Value::Closure(closure)) = self.prepared.globals.lookup(entry) else {
            return Err(RunError::load(format!(
                "module '{}' has no entry function '{entry}'",
                self.prepared.name
            )));
        };
        let args: Vec<Value> = self
            .cli_args
            .iter()
            .take(closure.target.params.len())
            .map(|raw| coerce_argument(raw))
            .collect();
        let mut vm = Vm {
            globals: Arc::clone(&self.prepared.globals),
            builtins: Arc::clone(&self.builtins),
            permitted: closure.effects.clone(),
            ambient: TaskRegistry::new(),
            purity: Arc::clone(&self.purity),
            determinism: Arc::clone(&self.determinism),
            printer,
            depth: 0,
            max_depth: self.max_depth,
        };
        let value = call_closure(&closure, args, &mut vm)?;
        Object::from_value(&value)
    }

    /// The jitter values recorded (or replayed) so far. Feeding this log to
    /// [`Runner::with_replay`] reproduces the observed retry delays.
    #[must_use]
    pub fn determinism_log(&self) -> Vec<u64> {
        self.determinism.lock().log().to_vec()
    }

    /// The purity records gathered while preparing and running.
    #[must_use]
    pub fn purity(&self) -> &PurityAnalyzer {
        &self.purity
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("module", &self.prepared.name)
            .field("cli_args", &self.cli_args)
            .finish_non_exhaustive()
    }
}
