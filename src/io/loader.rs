use std::fs;
use std::path::Path;

use crate::error::{SimError, SimResult, TemplateError};
use crate::kernel::template::{Operation, Template, TemplateOpSet, TemplateSection};

/// Parses one workload template. The first significant line declares the
/// address-space size; every following line is an operation, a `FORK`, or a
/// critical-section marker. Blank lines are ignored.
pub fn parse_template(name: &str, contents: &str) -> Result<Template, TemplateError> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let memory_required_mb = match lines.next() {
        Some((_, line)) => parse_memory_line(line)?,
        None => return Err(TemplateError::MissingMemoryLine),
    };

    let mut sections = Vec::new();
    let mut op_sets = Vec::new();
    let mut in_critical = false;

    let mut close_section = |op_sets: &mut Vec<TemplateOpSet>, critical: bool| {
        if !op_sets.is_empty() {
            sections.push(TemplateSection {
                critical,
                op_sets: std::mem::take(op_sets),
            });
        }
    };

    for (line_number, line) in lines {
        match line {
            "CRITICAL" => {
                if in_critical {
                    return Err(TemplateError::NestedCritical(line_number));
                }
                close_section(&mut op_sets, false);
                in_critical = true;
            }
            "/CRITICAL" => {
                if !in_critical {
                    return Err(TemplateError::UnmatchedCriticalEnd(line_number));
                }
                close_section(&mut op_sets, true);
                in_critical = false;
            }
            _ => op_sets.push(parse_op_set(line_number, line)?),
        }
    }

    if in_critical {
        return Err(TemplateError::UnterminatedCritical);
    }
    close_section(&mut op_sets, false);

    if sections.is_empty() {
        return Err(TemplateError::Empty);
    }
    Ok(Template::new(name, memory_required_mb, sections))
}

fn parse_memory_line(line: &str) -> Result<u64, TemplateError> {
    let value = line
        .strip_prefix("MEMORY_REQUIRED_MB:")
        .ok_or(TemplateError::MissingMemoryLine)?
        .trim();
    match value.parse::<u64>() {
        Ok(mb) if mb > 0 => Ok(mb),
        _ => Err(TemplateError::InvalidMemoryValue(value.to_string())),
    }
}

fn parse_op_set(line_number: usize, line: &str) -> Result<TemplateOpSet, TemplateError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let operation = Operation::parse(tokens[0])
        .ok_or_else(|| TemplateError::UnknownOperation(line_number, tokens[0].to_string()))?;

    if operation == Operation::Fork {
        if tokens.len() != 1 {
            return Err(TemplateError::WrongTokenCount(line_number));
        }
        // Fork bursts are fixed at one cycle; the bounds are unused.
        return Ok(TemplateOpSet {
            operation,
            min_cycles: 0,
            max_cycles: 0,
        });
    }

    if tokens.len() != 3 {
        return Err(TemplateError::WrongTokenCount(line_number));
    }
    let min_cycles = parse_cycle_bound(line_number, tokens[1])?;
    let max_cycles = parse_cycle_bound(line_number, tokens[2])?;
    if min_cycles >= max_cycles {
        return Err(TemplateError::InvalidCycleRange(line_number));
    }
    Ok(TemplateOpSet {
        operation,
        min_cycles,
        max_cycles,
    })
}

fn parse_cycle_bound(line_number: usize, token: &str) -> Result<u32, TemplateError> {
    token
        .parse::<u32>()
        .map_err(|_| TemplateError::InvalidCycleBound(line_number, token.to_string()))
}

/// Loads every `.txt` template under `dir`, in file-name order so template
/// indices (and so semaphore assignments) are stable across runs.
pub fn load_templates(dir: &Path) -> SimResult<Vec<Template>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| SimError::TemplatesDirectory(dir.to_path_buf(), e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SimError::TemplatesDirectory(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut templates = Vec::new();
    for path in paths {
        let contents = fs::read_to_string(&path)
            .map_err(|e| SimError::TemplatesDirectory(path.clone(), e))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut template = parse_template(&name, &contents)
            .map_err(|kind| SimError::Template { path: path.clone(), kind })?;
        template.index = templates.len();
        templates.push(template);
    }

    if templates.is_empty() {
        return Err(SimError::NoTemplates(dir.to_path_buf()));
    }
    Ok(templates)
}
