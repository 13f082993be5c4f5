// ============================================================================
// Explicit queries: SQL text -> QueryDescriptor
// ============================================================================
//
// Supported shapes, all against the repository's own table:
//
//   SELECT * | m | fields | relation.field [AS alias] | COUNT(*)
//     FROM <table> [alias] [WHERE ...] [ORDER BY ...] [LIMIT n]
//   UPDATE <table> [alias] SET f = <operand> | f = f (+|-) <operand> [WHERE ...]
//   DELETE FROM <table> [alias] [WHERE ...]
//
// Related fields are reached through the relation (`m.team.name`), so joins
// are rejected. Placeholders: `:name`, `$n`, `?n` and bare `?` (numbered in
// order of appearance).
//
// ============================================================================

use super::descriptor::{
    Assignment, Clause, Comparator, FieldPath, Operand, ParamRef, Predicate, Projection,
    QueryDescriptor, QueryKind, Selection, SetValue,
};
use super::sort::{Direction, Order, Sort};
use crate::core::{DataType, EntitySchema, RepoError, Result, Value};
use crate::storage::Catalog;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Rewrite `?` and `?n` outside string literals to `$n`.
fn number_positional_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_string = false;
    let mut next = 1;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_string = !in_string;
                out.push(c);
            }
            '?' if !in_string => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                if digits.is_empty() {
                    digits = next.to_string();
                    next += 1;
                }
                out.push('$');
                out.push_str(&digits);
            }
            _ => out.push(c),
        }
    }
    out
}

fn parse_placeholder(text: &str) -> Result<ParamRef> {
    if let Some(name) = text.strip_prefix(':') {
        if name.is_empty() {
            return Err(RepoError::ParameterBinding("empty parameter name".into()));
        }
        return Ok(ParamRef::Named(name.to_string()));
    }
    if let Some(number) = text.strip_prefix('$') {
        return match number.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(ParamRef::Positional(n - 1)),
            _ => Err(RepoError::ParameterBinding(format!(
                "invalid positional parameter '{}'",
                text
            ))),
        };
    }
    Err(RepoError::ParameterBinding(format!(
        "unsupported placeholder '{}'",
        text
    )))
}

fn convert_value(value: &sql_ast::Value) -> Result<Value> {
    match value {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Integer(i))
            } else {
                n.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RepoError::Query(format!("invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            Ok(Value::Text(s.clone()))
        }
        sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        other => Err(RepoError::Query(format!("unsupported literal: {}", other))),
    }
}

fn comparator_for(op: &sql_ast::BinaryOperator) -> Option<Comparator> {
    use sql_ast::BinaryOperator as Op;
    match op {
        Op::Eq => Some(Comparator::Equal),
        Op::NotEq => Some(Comparator::NotEqual),
        Op::Lt => Some(Comparator::LessThan),
        Op::LtEq => Some(Comparator::LessThanEqual),
        Op::Gt => Some(Comparator::GreaterThan),
        Op::GtEq => Some(Comparator::GreaterThanEqual),
        _ => None,
    }
}

/// `5 < age` is `age > 5`.
fn flipped(comparator: Comparator) -> Comparator {
    match comparator {
        Comparator::LessThan => Comparator::GreaterThan,
        Comparator::LessThanEqual => Comparator::GreaterThanEqual,
        Comparator::GreaterThan => Comparator::LessThan,
        Comparator::GreaterThanEqual => Comparator::LessThanEqual,
        other => other,
    }
}

fn merge(left: Predicate, right: Predicate, conjunction: bool) -> Predicate {
    let mut parts = Vec::new();
    for side in [left, right] {
        match (side, conjunction) {
            (Predicate::And(inner), true) | (Predicate::Or(inner), false) => parts.extend(inner),
            (other, _) => parts.push(other),
        }
    }
    if conjunction {
        Predicate::And(parts)
    } else {
        Predicate::Or(parts)
    }
}

fn table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|part| part.to_string())
        .ok_or_else(|| RepoError::Query("missing table name".into()))
}

fn is_count_star(expr: &sql_ast::Expr) -> bool {
    matches!(expr, sql_ast::Expr::Function(f) if f.name.to_string().eq_ignore_ascii_case("count"))
}

/// Names under which the queried table can be referenced.
struct Scope<'s> {
    schema: &'s EntitySchema,
    catalog: &'s Catalog,
    qualifiers: Vec<String>,
}

impl<'s> Scope<'s> {
    fn bind(
        schema: &'s EntitySchema,
        catalog: &'s Catalog,
        relation: &sql_ast::TableFactor,
    ) -> Result<Self> {
        let sql_ast::TableFactor::Table { name, alias, .. } = relation else {
            return Err(RepoError::Query(
                "only plain table references are supported".into(),
            ));
        };

        let table = table_name(name)?;
        if !table.eq_ignore_ascii_case(schema.table()) && !table.eq_ignore_ascii_case(schema.entity()) {
            return Err(RepoError::Query(format!(
                "query reads '{}' but the repository manages '{}'",
                table,
                schema.table()
            )));
        }

        let mut qualifiers = vec![
            schema.table().to_lowercase(),
            schema.entity().to_lowercase(),
            table.to_lowercase(),
        ];
        if let Some(alias) = alias {
            qualifiers.push(alias.name.value.to_lowercase());
        }

        Ok(Self {
            schema,
            catalog,
            qualifiers,
        })
    }

    fn is_qualifier(&self, name: &str) -> bool {
        self.qualifiers.iter().any(|q| q.eq_ignore_ascii_case(name))
    }

    fn path(&self, parts: &[&str]) -> Result<FieldPath> {
        let parts = match parts {
            [first, rest @ ..] if !rest.is_empty() && self.is_qualifier(first) => rest,
            all => all,
        };

        match parts {
            [field] => {
                self.schema.require_column(field)?;
                Ok(FieldPath::field(*field))
            }
            [relation, field] => {
                let target = self.catalog.related(self.schema, relation)?;
                target.require_column(field)?;
                Ok(FieldPath::nested(*relation, *field))
            }
            _ => Err(RepoError::Query(format!(
                "cannot resolve '{}'",
                parts.join(".")
            ))),
        }
    }

    /// Resolve a column reference; `None` when the expression is not one.
    fn column(&self, expr: &sql_ast::Expr) -> Result<Option<FieldPath>> {
        match expr {
            sql_ast::Expr::Identifier(ident) => self.path(&[ident.value.as_str()]).map(Some),
            sql_ast::Expr::CompoundIdentifier(idents) => {
                let parts: Vec<&str> = idents.iter().map(|i| i.value.as_str()).collect();
                self.path(&parts).map(Some)
            }
            sql_ast::Expr::Nested(inner) => self.column(inner),
            _ => Ok(None),
        }
    }

    fn require_column(&self, expr: &sql_ast::Expr) -> Result<FieldPath> {
        self.column(expr)?
            .ok_or_else(|| RepoError::Query(format!("expected a field reference, found {}", expr)))
    }
}

/// Parses explicit query text into descriptors for one entity.
pub struct SqlQueryParser<'a> {
    catalog: &'a Catalog,
}

impl<'a> SqlQueryParser<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn parse(&self, schema: &EntitySchema, sql: &str) -> Result<QueryDescriptor> {
        let dialect = PostgreSqlDialect {};
        let normalized = number_positional_placeholders(sql);
        let mut statements = Parser::parse_sql(&dialect, &normalized)
            .map_err(|e| RepoError::Query(format!("cannot parse '{}': {}", sql, e)))?;
        if statements.len() != 1 {
            return Err(RepoError::Query(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }

        let mut query = match statements.remove(0) {
            sql_ast::Statement::Query(query) => self.convert_select(schema, *query)?,
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.convert_update(schema, table, assignments, selection)?,
            sql_ast::Statement::Delete(delete) => self.convert_delete(schema, delete)?,
            other => {
                return Err(RepoError::Query(format!("unsupported statement: {}", other)));
            }
        };

        query.collect_parameters();
        check_placeholders(&query.parameters)?;
        Ok(query)
    }

    fn convert_select(&self, schema: &EntitySchema, query: sql_ast::Query) -> Result<QueryDescriptor> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(RepoError::Query("only plain SELECT queries are supported".into()));
        };

        if select.from.len() != 1 {
            return Err(RepoError::Query("query must read exactly one table".into()));
        }
        let from = &select.from[0];
        if !from.joins.is_empty() {
            return Err(RepoError::Query(
                "joins are not supported; reference related fields as relation.field".into(),
            ));
        }
        if select.having.is_some() {
            return Err(RepoError::Query("HAVING is not supported".into()));
        }
        if let sql_ast::GroupByExpr::Expressions(exprs, _) = &select.group_by
            && !exprs.is_empty()
        {
            return Err(RepoError::Query("GROUP BY is not supported".into()));
        }

        let scope = Scope::bind(schema, self.catalog, &from.relation)?;
        let mut descriptor = QueryDescriptor::select_all(schema.table());
        descriptor.distinct = select.distinct.is_some();

        let (kind, projection) = self.convert_projection(&scope, &select.projection)?;
        descriptor.kind = kind;
        descriptor.projection = projection;

        descriptor.predicate = match &select.selection {
            Some(expr) => Some(self.convert_predicate(&scope, expr)?),
            None => None,
        };
        descriptor.sort = self.convert_order_by(&scope, query.order_by)?;
        descriptor.limit = self.convert_limit(&query.limit_clause)?;
        Ok(descriptor)
    }

    fn convert_projection(
        &self,
        scope: &Scope<'_>,
        items: &[sql_ast::SelectItem],
    ) -> Result<(QueryKind, Projection)> {
        let mut entity = false;
        let mut count = false;
        let mut selections = Vec::new();

        for item in items {
            let (expr, alias) = match item {
                sql_ast::SelectItem::Wildcard(_) | sql_ast::SelectItem::QualifiedWildcard(..) => {
                    entity = true;
                    continue;
                }
                sql_ast::SelectItem::UnnamedExpr(expr) => (expr, None),
                sql_ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            };

            if is_count_star(expr) {
                count = true;
                continue;
            }
            if let sql_ast::Expr::Identifier(ident) = expr
                && scope.is_qualifier(&ident.value)
                && scope.schema.find_column_index(&ident.value).is_none()
            {
                entity = true;
                continue;
            }

            let path = scope.require_column(expr)?;
            let alias = alias.unwrap_or_else(|| path.field.clone());
            selections.push(Selection::new(path, alias));
        }

        match (entity, count, selections.is_empty()) {
            (false, true, true) => Ok((QueryKind::Count, Projection::Entity)),
            (true, false, true) => Ok((QueryKind::Select, Projection::Entity)),
            (false, false, false) => Ok((QueryKind::Select, Projection::Fields(selections))),
            _ => Err(RepoError::Query(
                "select either the entity, a list of fields, or COUNT(*)".into(),
            )),
        }
    }

    fn convert_predicate(&self, scope: &Scope<'_>, expr: &sql_ast::Expr) -> Result<Predicate> {
        use sql_ast::BinaryOperator as Op;

        match expr {
            sql_ast::Expr::Nested(inner) => self.convert_predicate(scope, inner),

            sql_ast::Expr::BinaryOp { left, op: Op::And, right } => Ok(merge(
                self.convert_predicate(scope, left)?,
                self.convert_predicate(scope, right)?,
                true,
            )),
            sql_ast::Expr::BinaryOp { left, op: Op::Or, right } => Ok(merge(
                self.convert_predicate(scope, left)?,
                self.convert_predicate(scope, right)?,
                false,
            )),

            sql_ast::Expr::BinaryOp { left, op, right } => {
                let comparator = comparator_for(op)
                    .ok_or_else(|| RepoError::Query(format!("unsupported operator {}", op)))?;
                if let Some(path) = scope.column(left)? {
                    let operand = self.convert_operand(right)?;
                    return Ok(clause(path, comparator, vec![operand]));
                }
                if let Some(path) = scope.column(right)? {
                    let operand = self.convert_operand(left)?;
                    return Ok(clause(path, flipped(comparator), vec![operand]));
                }
                Err(RepoError::Query(format!("comparison without a field: {}", expr)))
            }

            sql_ast::Expr::Like {
                negated,
                expr: target,
                pattern,
                escape_char,
                ..
            } => self.convert_like(scope, target, pattern, *negated, escape_char.is_some(), false),
            sql_ast::Expr::ILike {
                negated,
                expr: target,
                pattern,
                escape_char,
                ..
            } => self.convert_like(scope, target, pattern, *negated, escape_char.is_some(), true),

            sql_ast::Expr::InList {
                expr: target,
                list,
                negated,
            } => {
                let path = scope.require_column(target)?;
                let comparator = if *negated {
                    Comparator::NotIn
                } else {
                    Comparator::In
                };
                let operand = match list.as_slice() {
                    [single] => match self.convert_operand(single)? {
                        Operand::Literal(value) => Operand::Literal(Value::List(vec![value])),
                        param => param,
                    },
                    items => {
                        let mut values = Vec::with_capacity(items.len());
                        for item in items {
                            match self.convert_operand(item)? {
                                Operand::Literal(value) => values.push(value),
                                Operand::Param(param) => {
                                    return Err(RepoError::ParameterBinding(format!(
                                        "parameter {} must be the only element of an IN list",
                                        param
                                    )));
                                }
                            }
                        }
                        Operand::Literal(Value::List(values))
                    }
                };
                Ok(clause(path, comparator, vec![operand]))
            }

            sql_ast::Expr::IsNull(target) => Ok(clause(
                scope.require_column(target)?,
                Comparator::IsNull,
                Vec::new(),
            )),
            sql_ast::Expr::IsNotNull(target) => Ok(clause(
                scope.require_column(target)?,
                Comparator::IsNotNull,
                Vec::new(),
            )),

            sql_ast::Expr::Between {
                expr: target,
                negated,
                low,
                high,
            } => {
                if *negated {
                    return Err(RepoError::Query("NOT BETWEEN is not supported".into()));
                }
                let path = scope.require_column(target)?;
                let operands = vec![self.convert_operand(low)?, self.convert_operand(high)?];
                Ok(clause(path, Comparator::Between, operands))
            }

            _ => Err(RepoError::Query(format!("unsupported condition: {}", expr))),
        }
    }

    fn convert_like(
        &self,
        scope: &Scope<'_>,
        target: &sql_ast::Expr,
        pattern: &sql_ast::Expr,
        negated: bool,
        has_escape: bool,
        ignore_case: bool,
    ) -> Result<Predicate> {
        if has_escape {
            return Err(RepoError::Query("LIKE ... ESCAPE is not supported".into()));
        }
        let path = scope.require_column(target)?;
        let comparator = if negated {
            Comparator::NotLike
        } else {
            Comparator::Like
        };
        let operand = self.convert_operand(pattern)?;
        Ok(Predicate::Clause(
            Clause::new(path, comparator, vec![operand]).ignoring_case(ignore_case),
        ))
    }

    fn convert_operand(&self, expr: &sql_ast::Expr) -> Result<Operand> {
        match expr {
            sql_ast::Expr::Value(value) => match &value.value {
                sql_ast::Value::Placeholder(text) => Ok(Operand::Param(parse_placeholder(text)?)),
                other => Ok(Operand::Literal(convert_value(other)?)),
            },
            sql_ast::Expr::UnaryOp {
                op: sql_ast::UnaryOperator::Minus,
                expr: inner,
            } => match self.convert_operand(inner)? {
                Operand::Literal(Value::Integer(i)) => Ok(Operand::Literal(Value::Integer(-i))),
                Operand::Literal(Value::Float(f)) => Ok(Operand::Literal(Value::Float(-f))),
                _ => Err(RepoError::Query(format!("cannot negate {}", inner))),
            },
            sql_ast::Expr::Nested(inner) => self.convert_operand(inner),
            other => Err(RepoError::Query(format!(
                "expected a literal or parameter, found {}",
                other
            ))),
        }
    }

    fn convert_order_by(&self, scope: &Scope<'_>, order_by: Option<sql_ast::OrderBy>) -> Result<Sort> {
        let Some(order_by) = order_by else {
            return Ok(Sort::unsorted());
        };
        let sql_ast::OrderByKind::Expressions(exprs) = order_by.kind else {
            return Err(RepoError::Query("ORDER BY ALL is not supported".into()));
        };

        let mut orders = Vec::with_capacity(exprs.len());
        for order in exprs {
            let path = scope.require_column(&order.expr)?;
            let direction = match order.options.asc {
                Some(false) => Direction::Desc,
                _ => Direction::Asc,
            };
            orders.push(Order {
                property: path.to_string(),
                direction,
                ignore_case: false,
            });
        }
        Ok(Sort::from_orders(orders))
    }

    fn convert_limit(&self, limit_clause: &Option<sql_ast::LimitClause>) -> Result<Option<usize>> {
        let Some(clause) = limit_clause else {
            return Ok(None);
        };

        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                if offset.is_some() {
                    return Err(RepoError::Query(
                        "OFFSET is not supported; pass a PageRequest".into(),
                    ));
                }
                match limit {
                    Some(sql_ast::Expr::Value(value)) => match &value.value {
                        sql_ast::Value::Number(n, _) => n
                            .parse::<usize>()
                            .map(Some)
                            .map_err(|_| RepoError::Query(format!("invalid LIMIT {}", n))),
                        other => Err(RepoError::Query(format!("invalid LIMIT {}", other))),
                    },
                    Some(other) => Err(RepoError::Query(format!("invalid LIMIT {}", other))),
                    None => Ok(None),
                }
            }
            sql_ast::LimitClause::OffsetCommaLimit { .. } => Err(RepoError::Query(
                "LIMIT offset, count is not supported; pass a PageRequest".into(),
            )),
        }
    }

    fn convert_update(
        &self,
        schema: &EntitySchema,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<QueryDescriptor> {
        if !table.joins.is_empty() {
            return Err(RepoError::Query("UPDATE with joins is not supported".into()));
        }
        let scope = Scope::bind(schema, self.catalog, &table.relation)?;

        let mut converted = Vec::with_capacity(assignments.len());
        for assign in assignments {
            let sql_ast::AssignmentTarget::ColumnName(name) = &assign.target else {
                return Err(RepoError::Query("only plain column assignments are supported".into()));
            };
            let parts: Vec<String> = name.0.iter().map(|part| part.to_string()).collect();
            let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
            let path = scope.path(&parts)?;
            if path.relation.is_some() {
                return Err(RepoError::Query(format!("cannot assign related field {}", path)));
            }
            if path.field == schema.id_field() {
                return Err(RepoError::Query(format!(
                    "identifier '{}' cannot be updated",
                    path.field
                )));
            }

            let value = match &assign.value {
                sql_ast::Expr::BinaryOp { left, op, right }
                    if matches!(op, sql_ast::BinaryOperator::Plus | sql_ast::BinaryOperator::Minus)
                        && scope.column(left)?.as_ref() == Some(&path) =>
                {
                    let numeric = schema
                        .get_column(&path.field)
                        .is_some_and(|c| matches!(c.data_type, DataType::Integer | DataType::Float));
                    if !numeric {
                        return Err(RepoError::Query(format!(
                            "arithmetic on non-numeric field '{}'",
                            path.field
                        )));
                    }
                    let operand = self.convert_operand(right)?;
                    if matches!(op, sql_ast::BinaryOperator::Plus) {
                        SetValue::Add(operand)
                    } else {
                        SetValue::Subtract(operand)
                    }
                }
                other => SetValue::Assign(self.convert_operand(other)?),
            };
            converted.push(Assignment {
                field: path.field,
                value,
            });
        }

        let mut descriptor = QueryDescriptor::new(schema.table(), QueryKind::Update(converted));
        descriptor.predicate = match &selection {
            Some(expr) => Some(self.convert_predicate(&scope, expr)?),
            None => None,
        };
        Ok(descriptor)
    }

    fn convert_delete(&self, schema: &EntitySchema, delete: sql_ast::Delete) -> Result<QueryDescriptor> {
        let tables = match &delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) | sql_ast::FromTable::WithoutKeyword(tables) => {
                tables
            }
        };
        let [table] = tables.as_slice() else {
            return Err(RepoError::Query("DELETE must name exactly one table".into()));
        };
        if !table.joins.is_empty() {
            return Err(RepoError::Query("DELETE with joins is not supported".into()));
        }
        let scope = Scope::bind(schema, self.catalog, &table.relation)?;

        let mut descriptor = QueryDescriptor::new(schema.table(), QueryKind::Delete);
        descriptor.predicate = match &delete.selection {
            Some(expr) => Some(self.convert_predicate(&scope, expr)?),
            None => None,
        };
        Ok(descriptor)
    }
}

fn clause(path: FieldPath, comparator: Comparator, operands: Vec<Operand>) -> Predicate {
    Predicate::Clause(Clause::new(path, comparator, operands))
}

/// Placeholders must be all named or all positional, positional ones numbered without gaps.
fn check_placeholders(params: &[ParamRef]) -> Result<()> {
    let named = params.iter().any(|p| matches!(p, ParamRef::Named(_)));
    let mut positions: Vec<usize> = params
        .iter()
        .filter_map(|p| match p {
            ParamRef::Positional(idx) => Some(*idx),
            ParamRef::Named(_) => None,
        })
        .collect();

    if named && !positions.is_empty() {
        return Err(RepoError::ParameterBinding(
            "query mixes named and positional parameters".into(),
        ));
    }

    positions.sort_unstable();
    for (expected, actual) in positions.iter().enumerate() {
        if expected != *actual {
            return Err(RepoError::ParameterBinding(format!(
                "positional parameter ${} is never used",
                expected + 1
            )));
        }
    }
    Ok(())
}
