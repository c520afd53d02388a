//! GLSL `#include` expansion and `#define` injection.

use crate::GpuError;
use kiln_assets::AssetResolver;
use std::collections::BTreeMap;

/// Nesting limit for `#include`.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Load `sub_path`, expand its includes and inject `defines`.
pub fn preprocess(
    assets: &dyn AssetResolver,
    sub_path: &str,
    defines: &BTreeMap<String, String>,
) -> Result<String, GpuError> {
    let expanded = expand_includes(assets, sub_path)?;
    Ok(inject_defines(&expanded, defines))
}

/// Recursively replace `#include "file"` (relative to the including file) and
/// `#include <file>` (relative to the asset root) with the file contents.
pub fn expand_includes(assets: &dyn AssetResolver, sub_path: &str) -> Result<String, GpuError> {
    let mut stack = Vec::new();
    let mut out = String::new();
    expand(assets, sub_path, &mut stack, &mut out)?;
    Ok(out)
}

fn expand(
    assets: &dyn AssetResolver,
    sub_path: &str,
    stack: &mut Vec<String>,
    out: &mut String,
) -> Result<(), GpuError> {
    if stack.iter().any(|p| p == sub_path) {
        let mut chain = stack.clone();
        chain.push(sub_path.to_string());
        return Err(GpuError::IncludeCycle(chain.join(" -> ")));
    }
    if stack.len() >= MAX_INCLUDE_DEPTH {
        return Err(GpuError::IncludeDepth(sub_path.to_string()));
    }

    let source = assets.read_to_string(sub_path)?;
    stack.push(sub_path.to_string());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#include") {
            let target = parse_include(rest).ok_or_else(|| GpuError::MalformedInclude {
                file: sub_path.to_string(),
                line: line.to_string(),
            })?;
            let resolved = match target {
                IncludeTarget::Relative(path) => join_relative(sub_path, path),
                IncludeTarget::Root(path) => normalize(path),
            };
            expand(assets, &resolved, stack, out)?;
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    stack.pop();
    Ok(())
}

enum IncludeTarget<'a> {
    Relative(&'a str),
    Root(&'a str),
}

fn parse_include(rest: &str) -> Option<IncludeTarget<'_>> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"')?;
        Some(IncludeTarget::Relative(&inner[..end]))
    } else if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        Some(IncludeTarget::Root(&inner[..end]))
    } else {
        None
    }
}

fn join_relative(base: &str, include: &str) -> String {
    match base.rsplit_once('/') {
        Some((dir, _)) => normalize(&format!("{dir}/{include}")),
        None => normalize(include),
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Insert `defines` after the `#version` line (or at the top when there is
/// none), dropping existing `#define`s of the same names.
pub fn inject_defines(source: &str, defines: &BTreeMap<String, String>) -> String {
    if defines.is_empty() {
        return source.to_string();
    }

    let mut block = String::new();
    for (name, value) in defines {
        if value.is_empty() {
            block.push_str(&format!("#define {name}\n"));
        } else {
            block.push_str(&format!("#define {name} {value}\n"));
        }
    }

    let mut out = String::with_capacity(source.len() + block.len());
    let mut injected = false;
    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#define ") {
            let name = rest.split_whitespace().next().unwrap_or("");
            if defines.contains_key(name) {
                continue;
            }
        }
        if index == 0 && !trimmed.starts_with("#version") {
            out.push_str(&block);
            injected = true;
        }
        out.push_str(line);
        out.push('\n');
        if !injected && trimmed.starts_with("#version") {
            out.push_str(&block);
            injected = true;
        }
    }
    if !injected {
        out.push_str(&block);
    }
    out
}
