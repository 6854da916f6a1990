//! Source locator: resolves a scope to agencies and finds their monthly
//! archives.

use crate::error::{PipelineError, Result};
use crate::models::{AggregationIdentity, MonthlyRecord, Scope, ScopeSelector};
use crate::store::Store;
use tracing::{debug, info};

/// One independent pass of the pipeline: an identity and the agencies whose
/// months feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeMember {
    pub identity: AggregationIdentity,
    pub agency_ids: Vec<String>,
}

/// Expand a scope into the members processed one after another.
pub async fn resolve(store: &dyn Store, scope: &Scope) -> Result<Vec<ScopeMember>> {
    let members = match scope {
        Scope::AgencyYear { selector, year } => {
            let agency_ids = resolve_selector(store, selector, *year).await?;
            agency_ids
                .into_iter()
                .map(|agency_id| ScopeMember {
                    identity: AggregationIdentity::AgencyYear {
                        agency_id: agency_id.clone(),
                        year: *year,
                    },
                    agency_ids: vec![agency_id],
                })
                .collect()
        }
        Scope::GroupYear { group, year } => {
            let agency_ids =
                resolve_selector(store, &ScopeSelector::Group(group.clone()), *year).await?;
            vec![ScopeMember {
                identity: AggregationIdentity::GroupYear {
                    group: group.clone(),
                    year: *year,
                },
                agency_ids,
            }]
        }
        Scope::AgencyHistory { agency_id } => {
            let agency = store
                .get_agency(agency_id)
                .await
                .map_err(|e| PipelineError::lookup(format!("agency {}", agency_id), e))?;
            vec![ScopeMember {
                identity: AggregationIdentity::Agency {
                    agency_id: agency.id.clone(),
                },
                agency_ids: vec![agency.id],
            }]
        }
    };

    info!("Scope {} resolved to {} package(s)", scope, members.len());
    Ok(members)
}

async fn resolve_selector(
    store: &dyn Store,
    selector: &ScopeSelector,
    year: i32,
) -> Result<Vec<String>> {
    let agencies = match selector {
        ScopeSelector::Agency(id) => vec![store
            .get_agency(id)
            .await
            .map_err(|e| PipelineError::lookup(format!("agency {}", id), e))?],
        ScopeSelector::AllAgencies => store
            .get_all_agencies()
            .await
            .map_err(|e| PipelineError::lookup("listing agencies", e))?,
        ScopeSelector::Group(group) => store
            .get_ope(group, year)
            .await
            .map_err(|e| PipelineError::lookup(format!("group {} in {}", group, year), e))?,
    };

    if agencies.is_empty() {
        return Err(PipelineError::unresolved(format!(
            "{} resolved to no agencies for {}",
            selector, year
        )));
    }

    Ok(agencies.into_iter().map(|a| a.id).collect())
}

/// Monthly records with a package reference for `member`, in chronological
/// order.
pub async fn locate(store: &dyn Store, member: &ScopeMember) -> Result<Vec<MonthlyRecord>> {
    let records: Vec<MonthlyRecord> = match member.identity.year() {
        Some(year) => {
            let mut by_agency = store
                .get_monthly_info(&member.agency_ids, year)
                .await
                .map_err(|e| {
                    PipelineError::lookup(format!("monthly info for {}", member.identity), e)
                })?;
            member
                .agency_ids
                .iter()
                .flat_map(|id| by_agency.remove(id).unwrap_or_default())
                .collect()
        }
        None => {
            let mut all = Vec::new();
            for id in &member.agency_ids {
                let history = store.get_agency_history(id).await.map_err(|e| {
                    PipelineError::lookup(format!("history of agency {}", id), e)
                })?;
                all.extend(history);
            }
            all
        }
    };

    let total = records.len();
    let mut located: Vec<MonthlyRecord> = records
        .into_iter()
        .filter(|r| {
            if r.package.is_none() {
                debug!("{} {}/{} has no backup, skipping", r.agency_id, r.year, r.month);
            }
            r.package.is_some()
        })
        .collect();
    located.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    info!(
        "Located {} of {} monthly records for {}",
        located.len(),
        total,
        member.identity
    );
    Ok(located)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{record, FakeStore};

    #[tokio::test]
    async fn test_locate_skips_months_without_package() {
        let store = FakeStore::default().with_agency("mppb").with_months(vec![
            record("mppb", 2021, 2, Some("https://x/2.zip")),
            record("mppb", 2021, 1, Some("https://x/1.zip")),
            record("mppb", 2021, 3, None),
        ]);
        let member = ScopeMember {
            identity: AggregationIdentity::AgencyYear {
                agency_id: "mppb".to_string(),
                year: 2021,
            },
            agency_ids: vec!["mppb".to_string()],
        };

        let located = locate(&store, &member).await.unwrap();
        let months: Vec<u32> = located.iter().map(|r| r.month).collect();
        assert_eq!(months, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resolve_group_per_agency() {
        let store = FakeStore::default()
            .with_agency("a1")
            .with_agency("a2")
            .with_group("g1", 2020, &["a1", "a2"]);
        let scope = Scope::AgencyYear {
            selector: ScopeSelector::Group("g1".to_string()),
            year: 2020,
        };

        let members = resolve(&store, &scope).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[1].identity,
            AggregationIdentity::AgencyYear {
                agency_id: "a2".to_string(),
                year: 2020
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_empty_group_is_lookup_error() {
        let store = FakeStore::default();
        let scope = Scope::GroupYear {
            group: "nope".to_string(),
            year: 2020,
        };
        let err = resolve(&store, &scope).await.unwrap_err();
        assert_eq!(err.kind(), "lookup");
    }

    #[tokio::test]
    async fn test_resolve_unknown_agency_is_lookup_error() {
        let store = FakeStore::default();
        let scope = Scope::AgencyHistory {
            agency_id: "ghost".to_string(),
        };
        let err = resolve(&store, &scope).await.unwrap_err();
        assert!(matches!(err, PipelineError::Lookup { source: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_locate_history_spans_years() {
        let store = FakeStore::default().with_agency("mppb").with_months(vec![
            record("mppb", 2020, 12, Some("https://x/a.zip")),
            record("mppb", 2019, 5, Some("https://x/b.zip")),
            record("mppb", 2021, 1, Some("https://x/c.zip")),
        ]);
        let member = ScopeMember {
            identity: AggregationIdentity::Agency {
                agency_id: "mppb".to_string(),
            },
            agency_ids: vec!["mppb".to_string()],
        };
        let located = locate(&store, &member).await.unwrap();
        let years: Vec<i32> = located.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2019, 2020, 2021]);
    }
}
