//! Off-chain evaluation of a query against a credential the holder owns,
//! used to pick which credential to prove with.

use num_bigint::BigUint;
use serde_json::{Map, Value};
use tessera_claim::{hash_value, ContextLoader, Datatype, W3CCredential};
use tessera_core::field::fr_to_biguint;

use crate::error::QueryResult;
use crate::operator::Operator;
use crate::query::{FieldQuery, ProofQuery};

/// Look up a dotted field (`address.city`, `degrees.0`) in a credential subject.
pub fn lookup_field<'a>(subject: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = subject.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_number(datatype: Datatype, value: &Value) -> QueryResult<BigUint> {
    Ok(fr_to_biguint(&hash_value(datatype, value)?))
}

/// Evaluate one operator on the holder's value, comparing field-element
/// encodings the way the circuits do.
pub fn evaluate(
    operator: Operator,
    actual: Option<&Value>,
    values: &[Value],
    datatype: Datatype,
) -> QueryResult<bool> {
    match operator {
        Operator::Noop | Operator::Nullify => return Ok(true),
        Operator::Sd => return Ok(actual.is_some()),
        Operator::Exists => {
            let expected = values.first().and_then(Value::as_bool).unwrap_or(true);
            return Ok(actual.is_some() == expected);
        }
        _ => {}
    }
    let Some(actual) = actual else {
        return Ok(false);
    };
    if actual.is_array() || actual.is_object() {
        return Ok(false);
    }
    let a = as_number(datatype, actual)?;
    let vs = values
        .iter()
        .map(|v| as_number(datatype, v))
        .collect::<QueryResult<Vec<BigUint>>>()?;
    let first = vs.first();
    let between = || match (vs.first(), vs.get(1)) {
        (Some(lo), Some(hi)) => *lo <= a && a <= *hi,
        _ => false,
    };
    Ok(match operator {
        Operator::Eq => first == Some(&a),
        Operator::Ne => first.map(|v| *v != a).unwrap_or(false),
        Operator::Lt => first.map(|v| a < *v).unwrap_or(false),
        Operator::Gt => first.map(|v| a > *v).unwrap_or(false),
        Operator::Lte => first.map(|v| a <= *v).unwrap_or(false),
        Operator::Gte => first.map(|v| a >= *v).unwrap_or(false),
        Operator::In => vs.contains(&a),
        Operator::Nin => !vs.contains(&a),
        Operator::Between => between(),
        Operator::NonBetween => vs.len() == 2 && !between(),
        Operator::Noop | Operator::Nullify | Operator::Sd | Operator::Exists => true,
    })
}

fn field_matches(
    credential: &W3CCredential,
    fq: &FieldQuery,
    def: &tessera_claim::TypeDefinition,
) -> QueryResult<bool> {
    if fq.field.is_empty() {
        return Ok(true);
    }
    let datatype = match def.field(&fq.field) {
        Ok(fd) => fd.datatype,
        Err(_) => return Ok(false),
    };
    evaluate(
        fq.operator,
        lookup_field(&credential.credential_subject, &fq.field),
        &fq.values,
        datatype,
    )
}

/// Whether `credential` can answer `query`: type, context, issuer and every
/// field predicate.
pub fn credential_matches(
    credential: &W3CCredential,
    query: &ProofQuery,
    loader: &dyn ContextLoader,
) -> QueryResult<bool> {
    if !credential.types.iter().any(|t| *t == query.credential_type)
        || !credential.context.iter().any(|c| *c == query.context)
        || !query.allows_issuer(&credential.issuer)
    {
        return Ok(false);
    }
    let def = query.type_definition(loader)?;
    for fq in query.field_queries()? {
        if !field_matches(credential, &fq, &def)? {
            tracing::debug!(
                credential = %credential.id,
                field = %fq.field,
                operator = %fq.operator,
                "credential does not satisfy query"
            );
            return Ok(false);
        }
    }
    Ok(true)
}

/// Credentials from `candidates` that satisfy `query`, in input order.
pub fn filter_credentials<'a>(
    candidates: &'a [W3CCredential],
    query: &ProofQuery,
    loader: &dyn ContextLoader,
) -> QueryResult<Vec<&'a W3CCredential>> {
    let mut out = Vec::new();
    for c in candidates {
        if credential_matches(c, query, loader)? {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::*;
    use serde_json::json;

    fn employee(val: i64, issuer: &str) -> W3CCredential {
        serde_json::from_value(json!({
            "id": format!("urn:uuid:{}", val),
            "@context": ["https://www.w3.org/2018/credentials/v1", EMPLOYEE_URL],
            "type": ["VerifiableCredential", "EmployeeCredential"],
            "credentialSubject": {
                "type": "EmployeeCredential",
                "val": val,
                "isManager": false,
                "address": {"city": "Zug"}
            },
            "credentialStatus": {
                "id": "https://issuer.example/status/1",
                "type": "SparseMerkleTreeProof",
                "revocationNonce": 1
            },
            "issuer": issuer,
            "credentialSchema": {"id": "https://example.com/employee.json", "type": "JsonSchema2023"}
        }))
        .unwrap()
    }

    fn query(subject: Value) -> ProofQuery {
        ProofQuery::new(EMPLOYEE_URL, "EmployeeCredential")
            .with_subject(subject)
            .unwrap()
    }

    #[test]
    fn test_lookup_nested() {
        let c = employee(10, "did:iden3:a");
        assert_eq!(
            lookup_field(&c.credential_subject, "address.city"),
            Some(&json!("Zug"))
        );
        assert_eq!(lookup_field(&c.credential_subject, "address.zip"), None);
    }

    #[test]
    fn test_comparisons() {
        let ten = json!(10);
        let v = Some(&ten);
        let i = Datatype::Integer;
        assert!(evaluate(Operator::Eq, v, &[json!(10)], i).unwrap());
        assert!(!evaluate(Operator::Ne, v, &[json!(10)], i).unwrap());
        assert!(evaluate(Operator::Lt, v, &[json!(11)], i).unwrap());
        assert!(evaluate(Operator::Gte, v, &[json!(10)], i).unwrap());
        assert!(evaluate(Operator::In, v, &[json!(1), json!(10)], i).unwrap());
        assert!(evaluate(Operator::Nin, v, &[json!(1), json!(2)], i).unwrap());
        assert!(evaluate(Operator::Between, v, &[json!(5), json!(10)], i).unwrap());
        assert!(!evaluate(Operator::NonBetween, v, &[json!(5), json!(10)], i).unwrap());
        assert!(!evaluate(Operator::Eq, None, &[json!(10)], i).unwrap());
        assert!(evaluate(Operator::Exists, None, &[json!(false)], i).unwrap());
        assert!(evaluate(Operator::Sd, v, &[], i).unwrap());
    }

    #[test]
    fn test_credential_matches() {
        let loader = loader();
        let c = employee(10, "did:iden3:a");
        assert!(credential_matches(&c, &query(json!({"val": {"$eq": 10}})), &loader).unwrap());
        assert!(!credential_matches(&c, &query(json!({"val": {"$gt": 10}})), &loader).unwrap());
        assert!(
            credential_matches(&c, &query(json!({"address.city": {"$eq": "Zug"}})), &loader)
                .unwrap()
        );

        let mut restricted = query(json!({}));
        restricted.allowed_issuers = vec!["did:iden3:b".into()];
        assert!(!credential_matches(&c, &restricted, &loader).unwrap());

        let other_type = ProofQuery::new(KYC_URL, "KYCAgeCredential");
        assert!(!credential_matches(&c, &other_type, &loader).unwrap());
    }

    #[test]
    fn test_filter_keeps_order() {
        let loader = loader();
        let creds = vec![
            employee(3, "did:iden3:a"),
            employee(12, "did:iden3:a"),
            employee(20, "did:iden3:a"),
        ];
        let q = query(json!({"val": {"$gt": 5}}));
        let hits = filter_credentials(&creds, &q, &loader).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "urn:uuid:12");
    }
}
