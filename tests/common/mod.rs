//! Scripted services shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use contract_drafter::{
    DraftRenderer, DrafterConfig, Error, GenerationRequest, InMemoryRegistry, Phase,
    ProjectInputs, ProjectOrchestrator, ProjectRecord, ProjectRegistry, ProjectSummary,
    RenderedDraft, Result, Services, SourceGenerator, SourceUnit, Verification,
    VerificationCompiler,
};

/// Source with one auto-implicit proof obligation on line 3.
pub const PROOF_SOURCE: &str = "module Domains.SupplyDeal\n\
                                \n\
                                total : {auto prf : 55715000 = 50650000 + 5065000} -> Nat\n\
                                total = 55715000\n";

/// One scripted compiler response.
#[derive(Debug, Clone)]
pub enum CompileStep {
    Pass,
    Fail(String),
    /// Never returns; used for timeout and cancellation tests.
    Hang,
    /// The compiler cannot be run.
    Broken(String),
}

/// Compiler that plays back a script, then passes.
#[derive(Default)]
pub struct ScriptedCompiler {
    steps: Mutex<VecDeque<CompileStep>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedCompiler {
    pub fn new(steps: Vec<CompileStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(diagnostic: &str, times: usize) -> Self {
        Self::new(vec![CompileStep::Fail(diagnostic.to_string()); times])
    }

    /// Sources passed to `verify`, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl VerificationCompiler for ScriptedCompiler {
    async fn verify(&self, unit: &SourceUnit) -> Result<Verification> {
        self.seen.lock().unwrap().push(unit.source.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CompileStep::Pass);
        match step {
            CompileStep::Pass => Ok(Verification::Passed),
            CompileStep::Fail(diagnostic) => Ok(Verification::Failed(diagnostic)),
            CompileStep::Hang => std::future::pending().await,
            CompileStep::Broken(reason) => Err(Error::Compiler(reason)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// How the generator answers `generate_domain_source`.
#[derive(Debug, Clone)]
pub enum GenerateStep {
    Source(String),
    Hang,
    Fail(String),
}

/// Generator returning fixed source and numbered repairs.
pub struct ScriptedGenerator {
    generate: Mutex<GenerateStep>,
    requests: Mutex<Vec<GenerationRequest>>,
    repairs: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(source: &str) -> Self {
        Self::with_step(GenerateStep::Source(source.to_string()))
    }

    pub fn with_step(step: GenerateStep) -> Self {
        Self {
            generate: Mutex::new(step),
            requests: Mutex::new(Vec::new()),
            repairs: Mutex::new(Vec::new()),
        }
    }

    pub fn set_step(&self, step: GenerateStep) {
        *self.generate.lock().unwrap() = step;
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Diagnostics passed to `repair`, in order.
    pub fn repairs(&self) -> Vec<String> {
        self.repairs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceGenerator for ScriptedGenerator {
    async fn generate_domain_source(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.generate.lock().unwrap().clone();
        match step {
            GenerateStep::Source(source) => Ok(source),
            GenerateStep::Hang => std::future::pending().await,
            GenerateStep::Fail(reason) => Err(Error::Generation(reason)),
        }
    }

    async fn repair(&self, unit: &SourceUnit, diagnostic: &str) -> Result<String> {
        let mut repairs = self.repairs.lock().unwrap();
        repairs.push(diagnostic.to_string());
        Ok(format!("{}-- repair {}\n", unit.source, repairs.len()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Renderer echoing the verified source.
#[derive(Default)]
pub struct EchoRenderer;

#[async_trait]
impl DraftRenderer for EchoRenderer {
    async fn render(&self, unit: &SourceUnit) -> Result<RenderedDraft> {
        Ok(RenderedDraft {
            text: Some(format!("Draft v{}\n{}", unit.version, unit.source)),
            markdown: Some(format!("# Draft v{}\n", unit.version)),
            csv: None,
        })
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Renderer that blocks until released.
#[derive(Default)]
pub struct GatedRenderer {
    started: AtomicBool,
    release: Notify,
}

impl GatedRenderer {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl DraftRenderer for GatedRenderer {
    async fn render(&self, unit: &SourceUnit) -> Result<RenderedDraft> {
        self.started.store(true, Ordering::SeqCst);
        self.release.notified().await;
        EchoRenderer.render(unit).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// In-memory registry whose commits of records in one phase are slow.
pub struct SlowCommitRegistry {
    inner: InMemoryRegistry,
    phase: Phase,
    delay: Duration,
    slow_commit_started: AtomicBool,
}

impl SlowCommitRegistry {
    pub fn new(phase: Phase, delay: Duration) -> Self {
        Self {
            inner: InMemoryRegistry::new(),
            phase,
            delay,
            slow_commit_started: AtomicBool::new(false),
        }
    }

    pub fn slow_commit_started(&self) -> bool {
        self.slow_commit_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectRegistry for SlowCommitRegistry {
    async fn create(&self, record: &ProjectRecord) -> Result<()> {
        self.inner.create(record).await
    }

    async fn get(&self, name: &str) -> Result<ProjectRecord> {
        self.inner.get(name).await
    }

    async fn put(&self, record: &ProjectRecord) -> Result<()> {
        if record.phase() == self.phase {
            self.slow_commit_started.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }
        self.inner.put(record).await
    }

    async fn list(&self) -> Result<Vec<ProjectSummary>> {
        self.inner.list().await
    }
}

/// Orchestrator wired to scripted services.
pub struct Harness {
    pub orchestrator: Arc<ProjectOrchestrator>,
    pub compiler: Arc<ScriptedCompiler>,
    pub generator: Arc<ScriptedGenerator>,
}

impl Harness {
    pub fn new(compiler: ScriptedCompiler, generator: ScriptedGenerator) -> Self {
        Self::with_config(compiler, generator, DrafterConfig::default())
    }

    pub fn with_config(
        compiler: ScriptedCompiler,
        generator: ScriptedGenerator,
        config: DrafterConfig,
    ) -> Self {
        Self::assemble(
            compiler,
            generator,
            Arc::new(EchoRenderer),
            Arc::new(InMemoryRegistry::new()),
            config,
        )
    }

    pub fn assemble(
        compiler: ScriptedCompiler,
        generator: ScriptedGenerator,
        renderer: Arc<dyn DraftRenderer>,
        registry: Arc<dyn ProjectRegistry>,
        config: DrafterConfig,
    ) -> Self {
        let compiler = Arc::new(compiler);
        let generator = Arc::new(generator);
        let services = Services::new(compiler.clone(), generator.clone(), renderer);
        let orchestrator = Arc::new(ProjectOrchestrator::new(registry, services, &config));
        Self {
            orchestrator,
            compiler,
            generator,
        }
    }
}

pub fn inputs() -> ProjectInputs {
    ProjectInputs::new("Supply contract for 50,650,000 KRW plus 10% VAT")
        .with_reference("business_plan.md")
}
