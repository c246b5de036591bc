//! Turns a [`Plan`] into a single parameterized SQL string plus a
//! description of how to read each projected variable back out of a row.
//!
//! Every operator in `Plan` that can live in the same `SELECT` (BGP joins,
//! filters, BIND, GROUP BY, ORDER BY, DISTINCT/REDUCED, LIMIT/OFFSET) is
//! flattened into one [`FlatQuery`]. `LeftJoin`, `Union` and `Minus` can't be
//! flattened that way, so their non-flattenable side is planned as its own
//! derived subquery and joined/combined at the SQL level.

use std::collections::HashMap;

use spargebra::algebra::{AggregateExpression, Expression, OrderExpression};
use spargebra::term::{GroundTerm, Literal as SgLiteral, NamedNode as SgNamedNode, Variable};

use super::algebra::{Atom, Plan, PlanError, PlanResult, Slot};
use crate::ontology::Ontology;
use crate::value::{RangeKind, TypedValue};

/// Reserved namespace for full-text custom functions recognised by the
/// planner rather than pushed to SQLite as user-defined functions.
pub const FTS_NS: &str = "http://tracker.api.gnome.org/ontology/v3/fts#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRange {
    Resource,
    Literal(RangeKind),
    Computed,
}

#[derive(Debug, Clone)]
pub struct ProjectedVar {
    pub variable: Variable,
    pub index: usize,
    pub range: VarRange,
}

#[derive(Debug, Clone)]
pub struct SqlPlan {
    pub sql: String,
    pub params: Vec<TypedValue>,
    pub projected: Vec<ProjectedVar>,
}

#[derive(Clone)]
struct ColumnBinding {
    expr: String,
    range: VarRange,
}

struct FlatQuery {
    from: Vec<String>,
    wheres: Vec<String>,
    params: Vec<TypedValue>,
    vars: HashMap<String, ColumnBinding>,
    select_order: Vec<String>,
    group_by: Option<(Vec<Variable>, Vec<(Variable, AggregateExpression)>)>,
    order_by: Vec<(String, bool)>,
    distinct: bool,
    limit: Option<usize>,
    offset: Option<usize>,
    alias_seq: u32,
}

impl FlatQuery {
    fn new() -> Self {
        Self {
            from: Vec::new(),
            wheres: Vec::new(),
            params: Vec::new(),
            vars: HashMap::new(),
            select_order: Vec::new(),
            group_by: None,
            order_by: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
            alias_seq: 0,
        }
    }

    fn next_alias(&mut self) -> String {
        let a = format!("t{}", self.alias_seq);
        self.alias_seq += 1;
        a
    }

    /// Binds a variable to a column expression. If the variable is already
    /// bound (a repeated variable in the BGP, the usual join signal), emits
    /// an equality condition instead of overwriting the binding.
    fn bind_var(&mut self, var: &Variable, expr: String, range: VarRange) {
        let name = var.as_str().to_string();
        if let Some(existing) = self.vars.get(&name) {
            self.wheres.push(format!("{} = {}", existing.expr, expr));
        } else {
            if !self.select_order.contains(&name) {
                self.select_order.push(name.clone());
            }
            self.vars.insert(name, ColumnBinding { expr, range });
        }
    }

    fn constant_slot(&mut self, slot: &Slot, column_expr: &str, is_resource_col: bool) -> PlanResult<()> {
        match slot {
            Slot::Var(v) => {
                let range = if is_resource_col { VarRange::Resource } else { VarRange::Literal(RangeKind::String) };
                self.bind_var(v, column_expr.to_string(), range);
                Ok(())
            }
            Slot::Iri(iri) => {
                if is_resource_col {
                    self.wheres.push(format!(
                        "{} = (SELECT id FROM resources WHERE iri = ?)",
                        column_expr
                    ));
                    self.params.push(TypedValue::String(iri.clone()));
                } else {
                    return Err(PlanError::Unsupported("IRI literal compared against a literal column".to_string()));
                }
                Ok(())
            }
            Slot::Literal { lexical, language, .. } => {
                if is_resource_col {
                    return Err(PlanError::Unsupported("literal compared against a resource column".to_string()));
                }
                let value = match language {
                    Some(lang) => TypedValue::LangString(lexical.clone(), lang.clone()),
                    None => TypedValue::String(lexical.clone()),
                };
                self.wheres.push(format!("{} = ?", column_expr));
                self.params.push(value);
                Ok(())
            }
        }
    }

    fn add_atom(&mut self, atom: &Atom) -> PlanResult<()> {
        match atom {
            Atom::Type { table, subject } => {
                let alias = self.next_alias();
                self.from.push(format!("{table} AS {alias}"));
                self.constant_slot(subject, &format!("{alias}.subject"), true)?;
            }
            Atom::Single { table, column, subject, object, range } => {
                let alias = self.next_alias();
                self.from.push(format!("{table} AS {alias}"));
                self.wheres.push(format!("{alias}.{column} IS NOT NULL"));
                self.constant_slot(subject, &format!("{alias}.id"), true)?;
                let is_resource = matches!(range, RangeKind::Resource);
                match object {
                    Slot::Var(v) => {
                        let r = if is_resource { VarRange::Resource } else { VarRange::Literal(*range) };
                        self.bind_var(v, format!("{alias}.{column}"), r);
                    }
                    _ => self.constant_slot(object, &format!("{alias}.{column}"), is_resource)?,
                }
            }
            Atom::Multi { table, subject, object, range } => {
                let alias = self.next_alias();
                self.from.push(format!("{table} AS {alias}"));
                self.constant_slot(subject, &format!("{alias}.subject"), true)?;
                let is_resource = matches!(range, RangeKind::Resource);
                match object {
                    Slot::Var(v) => {
                        let r = if is_resource { VarRange::Resource } else { VarRange::Literal(*range) };
                        self.bind_var(v, format!("{alias}.value"), r);
                    }
                    _ => self.constant_slot(object, &format!("{alias}.value"), is_resource)?,
                }
            }
            Atom::TransitivePath { table, column_or_table, is_single, zero, subject, object } => {
                let cte_alias = self.next_alias();
                let closure_name = format!("{cte_alias}_closure");
                let closure_cte = if *is_single {
                    format!(
                        "{closure_name}(start_id, cur_id) AS (
                            SELECT id, {column_or_table} FROM {table} WHERE {column_or_table} IS NOT NULL
                            UNION
                            SELECT {closure_name}.start_id, t.{column_or_table}
                            FROM {closure_name} JOIN {table} t ON t.id = {closure_name}.cur_id
                            WHERE t.{column_or_table} IS NOT NULL
                        )"
                    )
                } else {
                    format!(
                        "{closure_name}(start_id, cur_id) AS (
                            SELECT subject, value FROM {column_or_table}
                            UNION
                            SELECT {closure_name}.start_id, t.value
                            FROM {closure_name} JOIN {column_or_table} t ON t.subject = {closure_name}.cur_id
                        )"
                    )
                };
                let view_cte = format!(
                    "{cte_alias}(subject, object) AS (
                        SELECT start_id, cur_id FROM {closure_name}
                        {unit}
                    )",
                    unit = if *zero { "UNION SELECT id, id FROM resources" } else { "" }
                );
                self.from.push(format!("__with__{closure_cte}"));
                self.from.push(format!("__with__{view_cte}"));
                self.from.push(format!("{cte_alias}"));
                self.constant_slot(subject, &format!("{cte_alias}.subject"), true)?;
                self.constant_slot(object, &format!("{cte_alias}.object"), true)?;
            }
        }
        Ok(())
    }

    fn column_for(&self, var: &Variable) -> PlanResult<ColumnBinding> {
        self.vars
            .get(var.as_str())
            .cloned()
            .ok_or_else(|| PlanError::Unsupported(format!("unbound variable ?{} in expression", var.as_str())))
    }
}

fn literal_param(lit: &SgLiteral) -> TypedValue {
    match lit.language() {
        Some(lang) => TypedValue::LangString(lit.value().to_string(), lang.to_string()),
        None => match lit.datatype().as_str() {
            "http://www.w3.org/2001/XMLSchema#integer" => lit.value().parse().map(TypedValue::Integer).unwrap_or_else(|_| TypedValue::String(lit.value().to_string())),
            "http://www.w3.org/2001/XMLSchema#double" | "http://www.w3.org/2001/XMLSchema#decimal" => {
                lit.value().parse().map(TypedValue::Double).unwrap_or_else(|_| TypedValue::String(lit.value().to_string()))
            }
            "http://www.w3.org/2001/XMLSchema#boolean" => {
                TypedValue::Boolean(lit.value() == "true" || lit.value() == "1")
            }
            _ => TypedValue::String(lit.value().to_string()),
        },
    }
}

fn translate_expr(expr: &Expression, q: &mut FlatQuery) -> PlanResult<String> {
    match expr {
        Expression::NamedNode(n) => {
            q.params.push(TypedValue::String(n.as_str().to_string()));
            Ok("(SELECT id FROM resources WHERE iri = ?)".to_string())
        }
        Expression::Literal(l) => {
            q.params.push(literal_param(l));
            Ok("?".to_string())
        }
        Expression::Variable(v) => Ok(q.column_for(v)?.expr),
        Expression::Or(a, b) => Ok(format!("({} OR {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::And(a, b) => Ok(format!("({} AND {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Equal(a, b) => Ok(format!("({} = {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::SameTerm(a, b) => Ok(format!("({} = {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Greater(a, b) => Ok(format!("({} > {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::GreaterOrEqual(a, b) => Ok(format!("({} >= {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Less(a, b) => Ok(format!("({} < {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::LessOrEqual(a, b) => Ok(format!("({} <= {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Add(a, b) => Ok(format!("({} + {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Subtract(a, b) => Ok(format!("({} - {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Multiply(a, b) => Ok(format!("({} * {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::Divide(a, b) => Ok(format!("({} / {})", translate_expr(a, q)?, translate_expr(b, q)?)),
        Expression::UnaryPlus(a) => Ok(format!("(+{})", translate_expr(a, q)?)),
        Expression::UnaryMinus(a) => Ok(format!("(-{})", translate_expr(a, q)?)),
        Expression::Not(a) => Ok(format!("(NOT {})", translate_expr(a, q)?)),
        Expression::Bound(v) => Ok(format!("({} IS NOT NULL)", q.column_for(v)?.expr)),
        Expression::If(cond, yes, no) => Ok(format!(
            "(CASE WHEN {} THEN {} ELSE {} END)",
            translate_expr(cond, q)?,
            translate_expr(yes, q)?,
            translate_expr(no, q)?
        )),
        Expression::In(expr, list) => {
            let target = translate_expr(expr, q)?;
            let mut opts = Vec::new();
            for e in list {
                opts.push(translate_expr(e, q)?);
            }
            Ok(format!("({} IN ({}))", target, opts.join(", ")))
        }
        Expression::Exists(_) => Err(PlanError::Unsupported("EXISTS filter".to_string())),
        Expression::FunctionCall(func, args) => translate_function(func, args, q),
        other => Err(PlanError::Unsupported(format!("expression {other:?}"))),
    }
}

fn translate_function(
    func: &spargebra::algebra::Function,
    args: &[Expression],
    q: &mut FlatQuery,
) -> PlanResult<String> {
    use spargebra::algebra::Function;
    match func {
        Function::Str => Ok(format!("CAST({} AS TEXT)", translate_expr(&args[0], q)?)),
        Function::Lang => Ok("''".to_string()),
        Function::Custom(iri) if iri.as_str() == format!("{FTS_NS}match") => {
            if args.len() != 2 {
                return Err(PlanError::Unsupported("fts:match expects (subject, query)".to_string()));
            }
            let subject_expr = translate_expr(&args[0], q)?;
            let query_text = match &args[1] {
                Expression::Literal(l) => l.value().to_string(),
                _ => return Err(PlanError::Unsupported("fts:match query must be a literal".to_string())),
            };
            q.params.push(TypedValue::String(query_text));
            Ok(format!(
                "EXISTS (SELECT 1 FROM fts_index WHERE subject = {subject_expr} AND fts_index MATCH ?)"
            ))
        }
        Function::Custom(iri) if iri.as_str() == format!("{FTS_NS}snippet") => {
            let subject_expr = translate_expr(&args[0], q)?;
            Ok(format!(
                "(SELECT snippet(fts_index, 2, '<b>', '</b>', '...', 32) FROM fts_index WHERE subject = {subject_expr} LIMIT 1)"
            ))
        }
        Function::Custom(iri) if iri.as_str() == format!("{FTS_NS}offsets") => {
            let subject_expr = translate_expr(&args[0], q)?;
            Ok(format!("(SELECT offsets(fts_index) FROM fts_index WHERE subject = {subject_expr} LIMIT 1)"))
        }
        other => Err(PlanError::Unsupported(format!("function {other:?}"))),
    }
}

fn aggregate_sql(agg: &AggregateExpression, q: &mut FlatQuery) -> PlanResult<String> {
    use AggregateExpression::*;
    Ok(match agg {
        Count { expr, distinct } => match expr {
            Some(e) => format!("COUNT({}{})", if *distinct { "DISTINCT " } else { "" }, translate_expr(e, q)?),
            None => "COUNT(*)".to_string(),
        },
        Sum { expr, distinct } => format!("SUM({}{})", if *distinct { "DISTINCT " } else { "" }, translate_expr(expr, q)?),
        Avg { expr, distinct } => format!("AVG({}{})", if *distinct { "DISTINCT " } else { "" }, translate_expr(expr, q)?),
        Min { expr, .. } => format!("MIN({})", translate_expr(expr, q)?),
        Max { expr, .. } => format!("MAX({})", translate_expr(expr, q)?),
        Sample { expr, .. } => translate_expr(expr, q)?,
        GroupConcat { expr, distinct, separator } => format!(
            "GROUP_CONCAT({}{}, '{}')",
            if *distinct { "DISTINCT " } else { "" },
            translate_expr(expr, q)?,
            separator.clone().unwrap_or_else(|| " ".to_string()).replace('\'', "''")
        ),
        _ => return Err(PlanError::Unsupported("custom aggregate".to_string())),
    })
}

fn order_expr(o: &OrderExpression, q: &mut FlatQuery) -> PlanResult<(String, bool)> {
    match o {
        OrderExpression::Asc(e) => Ok((translate_expr(e, q)?, true)),
        OrderExpression::Desc(e) => Ok((translate_expr(e, q)?, false)),
    }
}

fn ground_term_param(t: &GroundTerm) -> TypedValue {
    match t {
        GroundTerm::NamedNode(n) => TypedValue::String(n.as_str().to_string()),
        GroundTerm::Literal(l) => literal_param(l),
        GroundTerm::Triple(_) => TypedValue::String(String::new()),
    }
}

/// Flattens everything flattenable into `q`; returns the variables/columns
/// that still need resolving for operators that can't flatten further
/// (`LeftJoin`/`Union`/`Minus`), which the caller wraps as a subquery.
fn flatten(plan: &Plan, ontology: &Ontology, q: &mut FlatQuery) -> PlanResult<()> {
    match plan {
        Plan::UnitTable => Ok(()),
        Plan::Bgp(atoms) => {
            for atom in atoms {
                q.add_atom(atom)?;
            }
            Ok(())
        }
        Plan::Join(left, right) => {
            flatten(left, ontology, q)?;
            flatten(right, ontology, q)
        }
        Plan::Filter(inner, expr) => {
            flatten(inner, ontology, q)?;
            let sql = translate_expr(expr, q)?;
            q.wheres.push(sql);
            Ok(())
        }
        Plan::Extend(inner, var, expr) => {
            flatten(inner, ontology, q)?;
            let sql = translate_expr(expr, q)?;
            q.bind_var(var, sql, VarRange::Computed);
            Ok(())
        }
        Plan::Project(inner, vars) => {
            flatten(inner, ontology, q)?;
            q.select_order.retain(|name| vars.iter().any(|v| v.as_str() == name));
            Ok(())
        }
        Plan::Distinct(inner) => {
            flatten(inner, ontology, q)?;
            q.distinct = true;
            Ok(())
        }
        Plan::Reduced(inner) => flatten(inner, ontology, q),
        Plan::Slice(inner, start, length) => {
            flatten(inner, ontology, q)?;
            q.offset = *start;
            q.limit = *length;
            Ok(())
        }
        Plan::OrderBy(inner, exprs) => {
            flatten(inner, ontology, q)?;
            for e in exprs {
                let ord = order_expr(e, q)?;
                q.order_by.push(ord);
            }
            Ok(())
        }
        Plan::Group(inner, vars, aggregates) => {
            flatten(inner, ontology, q)?;
            q.group_by = Some((vars.clone(), aggregates.clone()));
            Ok(())
        }
        Plan::Values(vars, bindings) => {
            // Render as a VALUES-derived table joined on shared names.
            let alias = q.next_alias();
            let mut rows = Vec::new();
            for row in bindings {
                let mut cells = Vec::new();
                for cell in row {
                    match cell {
                        Some(t) => {
                            q.params.push(ground_term_param(t));
                            cells.push("?".to_string());
                        }
                        None => cells.push("NULL".to_string()),
                    }
                }
                rows.push(format!("({})", cells.join(", ")));
            }
            let col_names: Vec<String> = (0..vars.len()).map(|i| format!("c{i}")).collect();
            q.from.push(format!(
                "(SELECT {} FROM (VALUES {}) AS v({})) AS {alias}",
                col_names.join(", "),
                rows.join(", "),
                col_names.join(", ")
            ));
            for (i, var) in vars.iter().enumerate() {
                q.bind_var(var, format!("{alias}.c{i}"), VarRange::Literal(RangeKind::String));
            }
            Ok(())
        }
        Plan::LeftJoin(left, right, expr) => {
            flatten(left, ontology, q)?;
            let (sub_sql, sub_params, sub_cols) = build_subquery(right, ontology)?;
            let alias = q.next_alias();
            q.from.push(format!("LEFT JOIN ({sub_sql}) AS {alias}"));
            let start = q.params.len();
            q.params.extend(sub_params);
            let mut on_conditions = Vec::new();
            for (name, range) in &sub_cols {
                let col_expr = format!("{alias}.{name}");
                if let Some(existing) = q.vars.get(name) {
                    on_conditions.push(format!("{} = {}", existing.expr, col_expr));
                } else {
                    q.vars.insert(name.clone(), ColumnBinding { expr: col_expr.clone(), range: *range });
                    q.select_order.push(name.clone());
                }
            }
            if let Some(e) = expr {
                on_conditions.push(translate_expr(e, q)?);
            }
            let _ = start;
            if on_conditions.is_empty() {
                on_conditions.push("1 = 1".to_string());
            }
            if let Some(last) = q.from.last_mut() {
                last.push_str(&format!(" ON {}", on_conditions.join(" AND ")));
            }
            Ok(())
        }
        Plan::Union(left, right) => {
            let (left_sql, left_params, left_cols) = build_subquery(left, ontology)?;
            let (right_sql, right_params, right_cols) = build_subquery(right, ontology)?;
            let alias = q.next_alias();
            let names: Vec<String> = left_cols.iter().map(|(n, _)| n.clone()).collect();
            q.from.push(format!(
                "({left_sql} UNION {right_sql}) AS {alias}",
            ));
            q.params.extend(left_params);
            q.params.extend(right_params);
            for (name, range) in left_cols.iter().chain(right_cols.iter()) {
                if !names.contains(name) {
                    continue;
                }
                let col_expr = format!("{alias}.{name}");
                q.bind_var(&Variable::new_unchecked(name.clone()), col_expr, *range);
            }
            Ok(())
        }
        Plan::Minus(left, right) => {
            flatten(left, ontology, q)?;
            let (sub_sql, sub_params, sub_cols) = build_subquery(right, ontology)?;
            let mut conditions = Vec::new();
            for (name, _) in &sub_cols {
                if let Some(existing) = q.vars.get(name) {
                    conditions.push(format!("{} = sub.{}", existing.expr, name));
                }
            }
            if conditions.is_empty() {
                return Ok(());
            }
            q.wheres.push(format!(
                "NOT EXISTS (SELECT 1 FROM ({sub_sql}) AS sub WHERE {})",
                conditions.join(" AND ")
            ));
            q.params.extend(sub_params);
            Ok(())
        }
    }
}

/// Plans `plan` as a standalone derived-table subquery, returning its SQL,
/// parameters (in appearance order) and the `(column_name, range)` pairs a
/// parent query can join against.
fn build_subquery(plan: &Plan, ontology: &Ontology) -> PlanResult<(String, Vec<TypedValue>, Vec<(String, VarRange)>)> {
    let sql_plan = build_sql(plan, ontology)?;
    let cols: Vec<(String, VarRange)> = sql_plan
        .projected
        .iter()
        .map(|p| (p.variable.as_str().to_string(), p.range))
        .collect();
    Ok((sql_plan.sql, sql_plan.params, cols))
}

/// Builds the final parameterized SQL string for `plan`.
pub fn build_sql(plan: &Plan, ontology: &Ontology) -> PlanResult<SqlPlan> {
    let mut q = FlatQuery::new();
    flatten(plan, ontology, &mut q)?;

    if q.from.is_empty() {
        // UnitTable / all-constant plan: one row, no bindings beyond BIND'd
        // or VALUES-derived columns already gathered.
        q.from.push("(SELECT 1) AS unit".to_string());
    }

    let mut select_items = Vec::new();
    let mut projected = Vec::new();

    if let Some((group_vars, aggregates)) = q.group_by.clone() {
        for v in &group_vars {
            let binding = q.column_for(v)?;
            select_items.push(format!("{} AS {}", binding.expr, v.as_str()));
            projected.push(ProjectedVar { variable: v.clone(), index: select_items.len() - 1, range: binding.range });
        }
        for (out_var, agg) in &aggregates {
            let sql = aggregate_sql(agg, &mut q)?;
            select_items.push(format!("{} AS {}", sql, out_var.as_str()));
            projected.push(ProjectedVar {
                variable: out_var.clone(),
                index: select_items.len() - 1,
                range: VarRange::Literal(RangeKind::String),
            });
        }
    } else {
        for name in q.select_order.clone() {
            let binding = q.vars.get(&name).unwrap().clone();
            select_items.push(format!("{} AS {}", binding.expr, name));
            projected.push(ProjectedVar {
                variable: Variable::new_unchecked(name),
                index: select_items.len() - 1,
                range: binding.range,
            });
        }
    }

    if select_items.is_empty() {
        select_items.push("1 AS unit_col".to_string());
    }

    let mut sql = String::from("SELECT ");
    if q.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&select_items.join(", "));
    sql.push_str(" FROM ");
    let from_clause = join_from_items(&q.from);
    sql.push_str(&from_clause);
    if !q.wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&q.wheres.join(" AND "));
    }
    if let Some((group_vars, _)) = &q.group_by {
        if !group_vars.is_empty() {
            sql.push_str(" GROUP BY ");
            let cols: Vec<String> = group_vars.iter().map(|v| q.vars[v.as_str()].expr.clone()).collect();
            sql.push_str(&cols.join(", "));
        }
    }
    if !q.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        let parts: Vec<String> = q
            .order_by
            .iter()
            .map(|(e, asc)| format!("{} {}", e, if *asc { "ASC" } else { "DESC" }))
            .collect();
        sql.push_str(&parts.join(", "));
    }
    if let Some(limit) = q.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = q.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    } else if let Some(offset) = q.offset {
        sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"));
    }

    // `__with__` markers from property-path CTEs must be hoisted in front of
    // the statement as a single WITH clause (SQLite does not allow `WITH`
    // nested inside a FROM item).
    let ctes: Vec<&str> = q.from.iter().map(|s| s.as_str()).filter(|s| s.starts_with("__with__")).collect();
    if !ctes.is_empty() {
        let cte_bodies: Vec<String> = ctes.iter().map(|s| s.trim_start_matches("__with__").to_string()).collect();
        sql = format!("WITH RECURSIVE {} {}", cte_bodies.join(", "), sql);
    }

    Ok(SqlPlan { sql, params: q.params, projected })
}

/// Joins FROM items with `,` unless the item itself opens with `LEFT JOIN`/
/// `JOIN` (those already carry their own join keyword and `ON` clause), and
/// drops `__with__`-marked CTE bodies (hoisted separately into `WITH
/// RECURSIVE` ahead of the statement).
fn join_from_items(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        if item.starts_with("__with__") {
            continue;
        }
        if out.is_empty() {
            out.push_str(item);
        } else if item.starts_with("LEFT JOIN") || item.starts_with("JOIN") {
            out.push(' ');
            out.push_str(item);
        } else {
            out.push_str(", ");
            out.push_str(item);
        }
    }
    if out.is_empty() {
        out.push_str("(SELECT 1) AS unit");
    }
    out
}
