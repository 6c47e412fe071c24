//! Shader library compilation.
//!
//! Turns WGSL source text into a [`GraphLibrary`]: a validated SPIR-V blob
//! plus the graph reflection metadata the device needs to register a work
//! graph.
//!
//! # Source format
//!
//! The compiler accepts plain WGSL with three text-level extensions, all
//! resolved before the source reaches naga:
//!
//! - `#include "path"` pulls in a module registered on the compiler.
//! - `#ifdef NAME` / `#ifndef NAME` / `#else` / `#endif` gate lines on
//!   compile-time defines.
//! - Pragma comments carry the graph metadata the shading language itself
//!   cannot express:
//!
//! ```wgsl
//! //@graph(name = "WorkGraphTest")
//! //@params(num_records_per_entrypoint = 4, num_uints_to_print = 8)
//!
//! //@node(name = "entryNode", entry, record_stride = 8, local_args = 0)
//! @compute @workgroup_size(1)
//! fn entryNode(@builtin(global_invocation_id) gid: vec3<u32>) { /* ... */ }
//! ```
//!
//! The `//@graph` pragma names the graph program the library registers with
//! the device; lookups against a created program resolve or fail against
//! this name. Every `@compute` entry point in the library becomes a graph
//! node. A `//@node` pragma naming it marks it as an entrypoint, sets its
//! input record stride, or assigns its local-root-arguments-table slot;
//! without a pragma the node is internal, takes no records, and declares no
//! local arguments. The `//@params` pragma plays the role of config
//! constants embedded in the shader file: sandbox behavior can be tweaked
//! by editing only the shader.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::backend::NodeId;

/// Shader compilation error, carrying the compiler's error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A preprocessor directive was malformed or unbalanced.
    #[error("preprocessor error: {0}")]
    Preprocess(String),

    /// A `//@node` or `//@params` pragma was malformed.
    #[error("pragma error: {0}")]
    Pragma(String),

    /// A `//@node` pragma names a compute entry point that does not exist.
    #[error("node pragma names unknown compute entry point \"{0}\"")]
    UnknownNode(String),

    /// The WGSL front end rejected the source.
    #[error("parse error: {0}")]
    Parse(String),

    /// Module validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// SPIR-V generation failed.
    #[error("code generation error: {0}")]
    CodeGen(String),
}

/// Execution parameters read out of the shader file.
///
/// Stand-in for the original trick of dispatching a trivial compute shader
/// to fetch config constants from the shader source at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionParams {
    /// Input records generated per entrypoint.
    pub num_records_per_entrypoint: u32,
    /// Feed graph inputs from GPU-resident buffers instead of host memory.
    pub feed_graph_inputs_from_gpu_memory: bool,
    /// How many u32s of the output UAV to report after the run.
    pub num_uints_to_print: u32,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            num_records_per_entrypoint: 4,
            feed_graph_inputs_from_gpu_memory: false,
            num_uints_to_print: 8,
        }
    }
}

/// Reflection metadata for one graph node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub id: NodeId,
    /// Reachable directly from host-issued input records.
    pub is_entrypoint: bool,
    /// Size of one input record in bytes; zero for nodes taking no records.
    pub record_size_in_bytes: u32,
    /// Slot in the local-root-arguments table, when the node declares one.
    pub local_root_arguments_table_index: Option<u32>,
}

/// A compiled shader library: binary program blob plus graph reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphLibrary {
    code: Vec<u32>,
    graph_name: String,
    nodes: Vec<NodeMetadata>,
    params: ExecutionParams,
}

impl GraphLibrary {
    /// The SPIR-V program blob.
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Name the graph program registers under, declared by the `//@graph`
    /// pragma. Dispatch-time lookups resolve against this name.
    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// All nodes in the library, in declaration order.
    pub fn nodes(&self) -> &[NodeMetadata] {
        &self.nodes
    }

    /// Nodes reachable from host-issued input records.
    pub fn entrypoints(&self) -> impl Iterator<Item = &NodeMetadata> {
        self.nodes.iter().filter(|n| n.is_entrypoint)
    }

    /// Execution parameters declared in the source.
    pub fn params(&self) -> ExecutionParams {
        self.params
    }
}

/// WGSL shader library compiler.
///
/// Maintains the registered include modules and performs the full
/// source-to-blob pipeline: include resolution, define filtering, pragma
/// extraction, then parse / validate / SPIR-V emission through naga.
pub struct ShaderCompiler {
    /// Registered include sources: path -> source text.
    includes: HashMap<String, String>,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderCompiler {
    /// Create a compiler with no registered includes.
    pub fn new() -> Self {
        Self {
            includes: HashMap::new(),
        }
    }

    /// Register an includable module under the path that appears in
    /// `#include "path"` directives.
    pub fn register_include(&mut self, path: &str, source: &str) {
        self.includes.insert(path.to_string(), source.to_string());
    }

    /// Compile a shader library from source.
    ///
    /// `defines` gate `#ifdef` blocks; values are currently unused beyond
    /// presence.
    pub fn compile_library(
        &self,
        source: &str,
        defines: &[(String, String)],
    ) -> Result<GraphLibrary, CompileError> {
        let mut included = HashSet::new();
        let resolved = self.resolve_includes(source, &mut included)?;
        let filtered = apply_defines(&resolved, defines)?;

        let graph_name = parse_graph_pragma(&filtered)?
            .unwrap_or_else(|| crate::DEFAULT_GRAPH_NAME.to_string());
        let params = parse_params_pragma(&filtered)?;
        let pragmas = parse_node_pragmas(&filtered)?;

        let module = naga::front::wgsl::parse_str(&filtered)
            .map_err(|e| CompileError::Parse(e.emit_to_string(&filtered)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| CompileError::Validation(e.into_inner().to_string()))?;

        let options = naga::back::spv::Options::default();
        let code = naga::back::spv::write_vec(&module, &info, &options, None)
            .map_err(|e| CompileError::CodeGen(e.to_string()))?;

        let nodes = collect_nodes(&module, &pragmas)?;
        log::debug!(
            "compiled shader library: {} nodes, {} spirv words",
            nodes.len(),
            code.len()
        );

        Ok(GraphLibrary {
            code,
            graph_name,
            nodes,
            params,
        })
    }

    /// Resolve `#include` directives, recursively, with cycle protection.
    fn resolve_includes(
        &self,
        source: &str,
        included: &mut HashSet<String>,
    ) -> Result<String, CompileError> {
        let mut output = String::with_capacity(source.len());
        for line in source.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("#include") {
                let path = rest
                    .trim()
                    .strip_prefix('"')
                    .and_then(|p| p.strip_suffix('"'))
                    .ok_or_else(|| {
                        CompileError::Preprocess(format!("malformed include: {trimmed}"))
                    })?;
                if included.contains(path) {
                    // Already pulled in somewhere up the chain.
                    continue;
                }
                let module = self.includes.get(path).ok_or_else(|| {
                    CompileError::Preprocess(format!("unknown include \"{path}\""))
                })?;
                included.insert(path.to_string());
                output.push_str(&self.resolve_includes(module, included)?);
                output.push('\n');
            } else {
                output.push_str(line);
                output.push('\n');
            }
        }
        Ok(output)
    }
}

/// Filter `#ifdef` / `#ifndef` / `#else` / `#endif` blocks.
///
/// Directive lines themselves are dropped from the output.
fn apply_defines(source: &str, defines: &[(String, String)]) -> Result<String, CompileError> {
    // (branch taken, else already seen)
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut output = String::with_capacity(source.len());

    for (line_no, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        let active = stack.iter().all(|&(taken, _)| taken);

        if let Some(name) = trimmed.strip_prefix("#ifdef") {
            let name = name.trim();
            let defined = defines.iter().any(|(key, _)| key == name);
            stack.push((active && defined, false));
        } else if let Some(name) = trimmed.strip_prefix("#ifndef") {
            let name = name.trim();
            let defined = defines.iter().any(|(key, _)| key == name);
            stack.push((active && !defined, false));
        } else if trimmed == "#else" {
            let parent_active = stack[..stack.len().saturating_sub(1)]
                .iter()
                .all(|&(taken, _)| taken);
            match stack.last_mut() {
                None | Some(&mut (_, true)) => {
                    return Err(CompileError::Preprocess(format!(
                        "unexpected #else at line {}",
                        line_no + 1
                    )));
                }
                Some(top) => {
                    top.0 = parent_active && !top.0;
                    top.1 = true;
                }
            }
        } else if trimmed == "#endif" {
            if stack.pop().is_none() {
                return Err(CompileError::Preprocess(format!(
                    "unexpected #endif at line {}",
                    line_no + 1
                )));
            }
        } else if trimmed.starts_with('#') {
            return Err(CompileError::Preprocess(format!(
                "unknown directive at line {}: {}",
                line_no + 1,
                trimmed
            )));
        } else if active {
            output.push_str(line);
            output.push('\n');
        }
    }

    if !stack.is_empty() {
        return Err(CompileError::Preprocess(
            "unterminated #ifdef block".to_string(),
        ));
    }
    Ok(output)
}

/// One parsed pragma argument: bare flag or `key = value`.
type PragmaArg = (String, Option<String>);

fn parse_pragma_args(body: &str) -> Result<Vec<PragmaArg>, String> {
    let mut args = Vec::new();
    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("empty key in \"{part}\""));
                }
                let value = value.trim().trim_matches('"').to_string();
                args.push((key.to_string(), Some(value)));
            }
            None => args.push((part.to_string(), None)),
        }
    }
    Ok(args)
}

/// Extract the body of a pragma line, e.g. `//@node(...)` -> `...`.
fn pragma_body<'a>(line: &'a str, pragma: &str) -> Result<Option<&'a str>, CompileError> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix(pragma) else {
        return Ok(None);
    };
    let body = rest
        .trim()
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| CompileError::Pragma(format!("malformed pragma: {trimmed}")))?;
    Ok(Some(body))
}

fn parse_u32(key: &str, value: Option<String>) -> Result<u32, CompileError> {
    let value =
        value.ok_or_else(|| CompileError::Pragma(format!("\"{key}\" requires a value")))?;
    value
        .parse()
        .map_err(|_| CompileError::Pragma(format!("\"{key}\" is not a u32: {value}")))
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, CompileError> {
    match value.as_deref() {
        // A bare flag means "on", matching #define conventions.
        None | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(CompileError::Pragma(format!(
            "\"{key}\" is not a bool: {other}"
        ))),
    }
}

/// Parse the optional `//@graph(...)` pragma naming the graph program.
/// At most one is allowed.
fn parse_graph_pragma(source: &str) -> Result<Option<String>, CompileError> {
    let mut graph_name = None;
    for line in source.lines() {
        let Some(body) = pragma_body(line, "//@graph")? else {
            continue;
        };
        if graph_name.is_some() {
            return Err(CompileError::Pragma(
                "duplicate //@graph pragma".to_string(),
            ));
        }
        let mut name = None;
        for (key, value) in parse_pragma_args(body).map_err(CompileError::Pragma)? {
            match key.as_str() {
                "name" => {
                    name = Some(value.ok_or_else(|| {
                        CompileError::Pragma("\"name\" requires a value".to_string())
                    })?);
                }
                other => {
                    return Err(CompileError::Pragma(format!(
                        "unknown //@graph key \"{other}\""
                    )));
                }
            }
        }
        graph_name = Some(
            name.ok_or_else(|| CompileError::Pragma("//@graph requires a name".to_string()))?,
        );
    }
    Ok(graph_name)
}

/// Parse the optional `//@params(...)` pragma. At most one is allowed.
fn parse_params_pragma(source: &str) -> Result<ExecutionParams, CompileError> {
    let mut params = ExecutionParams::default();
    let mut seen = false;
    for line in source.lines() {
        let Some(body) = pragma_body(line, "//@params")? else {
            continue;
        };
        if seen {
            return Err(CompileError::Pragma(
                "duplicate //@params pragma".to_string(),
            ));
        }
        seen = true;
        for (key, value) in parse_pragma_args(body).map_err(CompileError::Pragma)? {
            match key.as_str() {
                "num_records_per_entrypoint" => {
                    params.num_records_per_entrypoint = parse_u32(&key, value)?;
                }
                "feed_graph_inputs_from_gpu_memory" => {
                    params.feed_graph_inputs_from_gpu_memory = parse_bool(&key, value)?;
                }
                "num_uints_to_print" => {
                    params.num_uints_to_print = parse_u32(&key, value)?;
                }
                other => {
                    return Err(CompileError::Pragma(format!(
                        "unknown //@params key \"{other}\""
                    )));
                }
            }
        }
    }
    Ok(params)
}

/// Parsed `//@node(...)` pragma, keyed by the entry point name it refines.
#[derive(Debug, Clone, Default)]
struct NodePragma {
    is_entrypoint: bool,
    record_stride: u32,
    local_args: Option<u32>,
    array_index: u32,
}

fn parse_node_pragmas(source: &str) -> Result<HashMap<String, NodePragma>, CompileError> {
    let mut pragmas = HashMap::new();
    for line in source.lines() {
        let Some(body) = pragma_body(line, "//@node")? else {
            continue;
        };
        let mut name = None;
        let mut pragma = NodePragma::default();
        for (key, value) in parse_pragma_args(body).map_err(CompileError::Pragma)? {
            match key.as_str() {
                "name" => {
                    name = Some(value.ok_or_else(|| {
                        CompileError::Pragma("\"name\" requires a value".to_string())
                    })?);
                }
                "entry" => pragma.is_entrypoint = parse_bool(&key, value)?,
                "record_stride" => pragma.record_stride = parse_u32(&key, value)?,
                "local_args" => {
                    let slot = parse_u32(&key, value)?;
                    // All-bits-set is the unused-slot marker in the GPU
                    // table and cannot name a real slot.
                    if slot == u32::MAX {
                        return Err(CompileError::Pragma(format!(
                            "\"local_args\" slot {slot} is reserved for unused entries"
                        )));
                    }
                    pragma.local_args = Some(slot);
                }
                "array_index" => pragma.array_index = parse_u32(&key, value)?,
                other => {
                    return Err(CompileError::Pragma(format!(
                        "unknown //@node key \"{other}\""
                    )));
                }
            }
        }
        let name =
            name.ok_or_else(|| CompileError::Pragma("//@node requires a name".to_string()))?;
        if pragmas.insert(name.clone(), pragma).is_some() {
            return Err(CompileError::Pragma(format!(
                "duplicate //@node pragma for \"{name}\""
            )));
        }
    }
    Ok(pragmas)
}

/// Pair compute entry points with their pragmas to produce node metadata.
fn collect_nodes(
    module: &naga::Module,
    pragmas: &HashMap<String, NodePragma>,
) -> Result<Vec<NodeMetadata>, CompileError> {
    let mut nodes = Vec::new();
    let mut matched = HashSet::new();

    for entry_point in &module.entry_points {
        if entry_point.stage != naga::ShaderStage::Compute {
            continue;
        }
        let name = entry_point.name.as_str();
        match pragmas.get(name) {
            Some(pragma) => {
                matched.insert(name.to_string());
                nodes.push(NodeMetadata {
                    id: NodeId::new(name, pragma.array_index),
                    is_entrypoint: pragma.is_entrypoint,
                    record_size_in_bytes: pragma.record_stride,
                    local_root_arguments_table_index: pragma.local_args,
                });
            }
            None => nodes.push(NodeMetadata {
                id: NodeId::new(name, 0),
                is_entrypoint: false,
                record_size_in_bytes: 0,
                local_root_arguments_table_index: None,
            }),
        }
    }

    for name in pragmas.keys() {
        if !matched.contains(name) {
            return Err(CompileError::UnknownNode(name.clone()));
        }
    }
    Ok(nodes)
}
