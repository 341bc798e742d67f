//! Built-in public tools: read-only lookups against public biomedical data
//! sources, available without any tool-server discovery.
//!
//! Each tool declares a JSON input schema and projects a stable, bounded
//! subset of the upstream payload; the raw upstream response is never
//! surfaced to the model. Result counts are clamped and long free-text
//! fields clipped to keep tool results inside the prompt budget.

use crate::lodestar::tool_protocol::{ToolError, ToolSchema};
use lazy_static::lazy_static;
use serde_json::{json, Value};

const CLINICAL_TRIALS_API: &str = "https://clinicaltrials.gov/api/v2/studies";
const EUTILS_API: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const CHEMBL_API: &str = "https://www.ebi.ac.uk/chembl/api/data";
const OPENFDA_API: &str = "https://api.fda.gov/drug/drugsfda.json";
const OPEN_TARGETS_API: &str = "https://api.platform.opentargets.org/api/v4/graphql";

lazy_static! {
    /// Schema table for every built-in public tool, in a fixed order.
    pub static ref PUBLIC_TOOLS: Vec<ToolSchema> = vec![
        ToolSchema::new(
            "search_clinical_trials",
            "Search ClinicalTrials.gov for clinical trials by condition, intervention, \
             status, or sponsor. Returns structured trial data including NCT IDs, phases, \
             status, and enrollment.",
            json!({
                "type": "object",
                "properties": {
                    "condition": {"type": "string", "description": "Disease or condition (e.g. 'CLN3 Batten Disease')"},
                    "intervention": {"type": "string", "description": "Drug or treatment name"},
                    "status": {"type": "string", "description": "Trial status: RECRUITING, COMPLETED, ACTIVE_NOT_RECRUITING, etc."},
                    "page_size": {"type": "integer", "description": "Number of results (default 10, max 50)", "default": 10},
                },
                "required": [],
            }),
        ),
        ToolSchema::new(
            "get_trial_details",
            "Get full details for a specific clinical trial by NCT ID. Returns eligibility \
             criteria, endpoints, locations, sponsors, and study design.",
            json!({
                "type": "object",
                "properties": {
                    "nct_id": {"type": "string", "description": "NCT identifier (e.g. 'NCT03770572')"},
                },
                "required": ["nct_id"],
            }),
        ),
        ToolSchema::new(
            "search_pubmed",
            "Search PubMed for biomedical literature. Returns article titles, authors, \
             abstracts, PMIDs, and publication dates.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query (e.g. 'CLN3 gene therapy')"},
                    "max_results": {"type": "integer", "description": "Number of results (default 10, max 20)", "default": 10},
                },
                "required": ["query"],
            }),
        ),
        ToolSchema::new(
            "search_chembl_compound",
            "Search ChEMBL for compounds by name. Returns ChEMBL IDs, molecular properties, \
             max clinical phase, and structure info.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Compound or drug name (e.g. 'miglustat', 'cysteamine')"},
                },
                "required": ["name"],
            }),
        ),
        ToolSchema::new(
            "search_chembl_target",
            "Search ChEMBL for biological targets by name or gene symbol. Returns target \
             ChEMBL IDs, type, organism, and associated compounds.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Target name or gene symbol (e.g. 'CLN3', 'TPP1')"},
                },
                "required": ["query"],
            }),
        ),
        ToolSchema::new(
            "search_chembl_bioactivity",
            "Get bioactivity data (IC50, EC50, Ki) for a ChEMBL target. Returns \
             compound-target activity measurements.",
            json!({
                "type": "object",
                "properties": {
                    "target_chembl_id": {"type": "string", "description": "ChEMBL target ID (e.g. 'CHEMBL1824')"},
                    "limit": {"type": "integer", "description": "Max results (default 20)", "default": 20},
                },
                "required": ["target_chembl_id"],
            }),
        ),
        ToolSchema::new(
            "search_openfda_orphan",
            "Search FDA orphan drug designations by disease or drug name. Returns \
             designation details, sponsor, approval status.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Disease or drug name (e.g. 'neuronal ceroid lipofuscinosis')"},
                    "limit": {"type": "integer", "description": "Max results (default 10)", "default": 10},
                },
                "required": ["query"],
            }),
        ),
        ToolSchema::new(
            "search_open_targets",
            "Search Open Targets for disease-target associations. Returns association \
             scores, evidence counts, and tractability data for drug target prioritization.",
            json!({
                "type": "object",
                "properties": {
                    "disease_query": {"type": "string", "description": "Disease name to search"},
                    "size": {"type": "integer", "description": "Max results (default 10)", "default": 10},
                },
                "required": ["disease_query"],
            }),
        ),
    ];
}

/// Look up a public tool schema by name.
pub fn public_tool(name: &str) -> Option<&'static ToolSchema> {
    PUBLIC_TOOLS.iter().find(|tool| tool.name == name)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    str_arg(args, key)
        .ok_or_else(|| ToolError::Malformed(format!("missing required argument '{}'", key)))
}

fn int_arg(args: &Value, key: &str, default: u64, max: u64) -> u64 {
    args.get(key)
        .and_then(Value::as_u64)
        .unwrap_or(default)
        .min(max)
}

fn clip(value: Option<&str>, limit: usize) -> String {
    let mut text = value.unwrap_or_default().to_string();
    crate::lodestar::tool_protocol::truncate_in_place(&mut text, limit);
    text
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Executor for the built-in public tools. Shares the process-wide
/// outbound connection pool.
pub struct PublicToolClient {
    http: reqwest::Client,
}

impl PublicToolClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Invoke a public tool by name. The caller guarantees the name came
    /// from [`PUBLIC_TOOLS`]; anything else is an unknown tool.
    pub async fn invoke(&self, tool_name: &str, args: &Value) -> Result<String, ToolError> {
        match tool_name {
            "search_clinical_trials" => self.search_clinical_trials(args).await,
            "get_trial_details" => self.get_trial_details(args).await,
            "search_pubmed" => self.search_pubmed(args).await,
            "search_chembl_compound" => self.search_chembl_compound(args).await,
            "search_chembl_target" => self.search_chembl_target(args).await,
            "search_chembl_bioactivity" => self.search_chembl_bioactivity(args).await,
            "search_openfda_orphan" => self.search_openfda_orphan(args).await,
            "search_open_targets" => self.search_open_targets(args).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, ToolError> {
        let response = self.http.get(url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::UpstreamStatus(status.to_string()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))
    }

    async fn search_clinical_trials(&self, args: &Value) -> Result<String, ToolError> {
        let mut params = vec![
            ("format", "json".to_string()),
            (
                "pageSize",
                int_arg(args, "page_size", 10, 50).to_string(),
            ),
        ];
        if let Some(condition) = str_arg(args, "condition") {
            params.push(("query.cond", condition.to_string()));
        }
        if let Some(intervention) = str_arg(args, "intervention") {
            params.push(("query.intr", intervention.to_string()));
        }
        if let Some(status) = str_arg(args, "status") {
            params.push(("filter.overallStatus", status.to_string()));
        }

        let body = self.get_json(CLINICAL_TRIALS_API, &params).await?;
        let studies = body.get("studies").and_then(Value::as_array);

        let trials: Vec<Value> = studies
            .map(|list| {
                list.iter()
                    .map(|study| {
                        let proto = &study["protocolSection"];
                        json!({
                            "nctId": proto["identificationModule"]["nctId"],
                            "title": proto["identificationModule"]["briefTitle"],
                            "status": proto["statusModule"]["overallStatus"],
                            "phase": proto["designModule"].get("phases").cloned()
                                .unwrap_or_else(|| json!(["N/A"])),
                            "enrollment": proto["designModule"]["enrollmentInfo"]["count"],
                            "briefSummary": clip(
                                proto["descriptionModule"]["briefSummary"].as_str(), 500),
                            "sponsor": proto["sponsorCollaboratorsModule"]["leadSponsor"]["name"],
                            "startDate": proto["statusModule"]["startDateStruct"]["date"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({ "total": trials.len(), "trials": trials })))
    }

    async fn get_trial_details(&self, args: &Value) -> Result<String, ToolError> {
        let nct_id = required_str(args, "nct_id")?;
        let url = format!("{}/{}", CLINICAL_TRIALS_API, nct_id);
        let body = self
            .get_json(&url, &[("format", "json".to_string())])
            .await?;

        let proto = &body["protocolSection"];
        let locations: Vec<Value> = proto["contactsLocationsModule"]["locations"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(10)
                    .map(|loc| {
                        json!({
                            "facility": loc["facility"],
                            "city": loc["city"],
                            "state": loc["state"],
                            "country": loc["country"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let secondary: Vec<Value> = proto["outcomesModule"]["secondaryOutcomes"]
            .as_array()
            .map(|list| list.iter().take(5).cloned().collect())
            .unwrap_or_default();

        Ok(render(&json!({
            "nctId": proto["identificationModule"]["nctId"],
            "title": proto["identificationModule"]["officialTitle"],
            "status": proto["statusModule"]["overallStatus"],
            "phase": proto["designModule"]["phases"],
            "studyType": proto["designModule"]["studyType"],
            "enrollment": proto["designModule"]["enrollmentInfo"]["count"],
            "eligibility": clip(
                proto["eligibilityModule"]["eligibilityCriteria"].as_str(), 2_000),
            "minAge": proto["eligibilityModule"]["minimumAge"],
            "maxAge": proto["eligibilityModule"]["maximumAge"],
            "sex": proto["eligibilityModule"]["sex"],
            "primaryOutcomes": proto["outcomesModule"].get("primaryOutcomes").cloned()
                .unwrap_or_else(|| json!([])),
            "secondaryOutcomes": secondary,
            "interventions": proto["armsInterventionsModule"].get("interventions").cloned()
                .unwrap_or_else(|| json!([])),
            "locations": locations,
        })))
    }

    async fn search_pubmed(&self, args: &Value) -> Result<String, ToolError> {
        let query = required_str(args, "query")?;
        let max_results = int_arg(args, "max_results", 10, 20);

        // Two-step E-utilities flow: search for PMIDs, then fetch summaries.
        let search_url = format!("{}/esearch.fcgi", EUTILS_API);
        let search = self
            .get_json(
                &search_url,
                &[
                    ("db", "pubmed".to_string()),
                    ("term", query.to_string()),
                    ("retmax", max_results.to_string()),
                    ("retmode", "json".to_string()),
                    ("sort", "relevance".to_string()),
                ],
            )
            .await?;

        let ids: Vec<String> = search
            .pointer("/esearchresult/idlist")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok(render(&json!({ "total": 0, "articles": [] })));
        }

        let summary_url = format!("{}/esummary.fcgi", EUTILS_API);
        let summaries = self
            .get_json(
                &summary_url,
                &[
                    ("db", "pubmed".to_string()),
                    ("id", ids.join(",")),
                    ("retmode", "json".to_string()),
                ],
            )
            .await?;

        let result_map = &summaries["result"];
        let articles: Vec<Value> = ids
            .iter()
            .filter_map(|pmid| {
                let article = result_map.get(pmid)?.as_object()?;
                let authors: Vec<Value> = article
                    .get("authors")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .take(5)
                            .filter_map(|a| a.get("name").cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                Some(json!({
                    "pmid": pmid,
                    "title": article.get("title").cloned().unwrap_or_default(),
                    "authors": authors,
                    "journal": article.get("fulljournalname").cloned().unwrap_or_default(),
                    "pubDate": article.get("pubdate").cloned().unwrap_or_default(),
                    "doi": article.get("elocationid").cloned().unwrap_or_default(),
                }))
            })
            .collect();

        Ok(render(&json!({ "total": articles.len(), "articles": articles })))
    }

    async fn search_chembl_compound(&self, args: &Value) -> Result<String, ToolError> {
        let name = required_str(args, "name")?;
        let url = format!("{}/molecule/search.json", CHEMBL_API);
        let body = self
            .get_json(
                &url,
                &[("q", name.to_string()), ("limit", "10".to_string())],
            )
            .await?;

        let compounds: Vec<Value> = body["molecules"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(10)
                    .map(|molecule| {
                        let props = &molecule["molecule_properties"];
                        json!({
                            "chembl_id": molecule["molecule_chembl_id"],
                            "name": molecule["pref_name"],
                            "max_phase": molecule["max_phase"],
                            "molecule_type": molecule["molecule_type"],
                            "mw": props["full_mwt"],
                            "alogp": props["alogp"],
                            "hba": props["hba"],
                            "hbd": props["hbd"],
                            "psa": props["psa"],
                            "ro5_violations": props["num_ro5_violations"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({ "total": compounds.len(), "compounds": compounds })))
    }

    async fn search_chembl_target(&self, args: &Value) -> Result<String, ToolError> {
        let query = required_str(args, "query")?;
        let url = format!("{}/target/search.json", CHEMBL_API);
        let body = self
            .get_json(
                &url,
                &[("q", query.to_string()), ("limit", "10".to_string())],
            )
            .await?;

        let targets: Vec<Value> = body["targets"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(10)
                    .map(|target| {
                        let gene_symbols: Vec<Value> = target["target_components"]
                            .as_array()
                            .map(|components| {
                                components
                                    .iter()
                                    .flat_map(|comp| {
                                        comp["target_component_synonyms"]
                                            .as_array()
                                            .cloned()
                                            .unwrap_or_default()
                                    })
                                    .filter(|syn| syn["syn_type"] == "GENE_SYMBOL")
                                    .filter_map(|syn| syn.get("component_synonym").cloned())
                                    .take(3)
                                    .collect()
                            })
                            .unwrap_or_default();
                        json!({
                            "chembl_id": target["target_chembl_id"],
                            "name": target["pref_name"],
                            "type": target["target_type"],
                            "organism": target["organism"],
                            "gene_symbols": gene_symbols,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({ "total": targets.len(), "targets": targets })))
    }

    async fn search_chembl_bioactivity(&self, args: &Value) -> Result<String, ToolError> {
        let target_id = required_str(args, "target_chembl_id")?;
        let limit = int_arg(args, "limit", 20, 50);
        let url = format!("{}/activity.json", CHEMBL_API);
        let body = self
            .get_json(
                &url,
                &[
                    ("target_chembl_id", target_id.to_string()),
                    ("limit", limit.to_string()),
                    ("pchembl_value__isnull", "false".to_string()),
                ],
            )
            .await?;

        let activities: Vec<Value> = body["activities"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|activity| {
                        json!({
                            "molecule_chembl_id": activity["molecule_chembl_id"],
                            "molecule_name": activity["molecule_pref_name"],
                            "activity_type": activity["standard_type"],
                            "value": activity["standard_value"],
                            "units": activity["standard_units"],
                            "pchembl": activity["pchembl_value"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({ "total": activities.len(), "activities": activities })))
    }

    async fn search_openfda_orphan(&self, args: &Value) -> Result<String, ToolError> {
        let query = required_str(args, "query")?;
        let limit = int_arg(args, "limit", 10, 25);

        let primary = self
            .http
            .get(OPENFDA_API)
            .query(&[
                (
                    "search",
                    format!(
                        "openfda.brand_name:\"{q}\"+openfda.generic_name:\"{q}\"",
                        q = query
                    ),
                ),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        // openFDA answers 404 for empty result sets; retry against active
        // ingredients before giving up.
        let body = if primary.status() == reqwest::StatusCode::NOT_FOUND {
            let fallback = self
                .http
                .get(OPENFDA_API)
                .query(&[
                    (
                        "search",
                        format!("products.active_ingredients.name:\"{}\"", query),
                    ),
                    ("limit", limit.to_string()),
                ])
                .send()
                .await?;
            if !fallback.status().is_success() {
                return Ok(render(&json!({
                    "total": 0,
                    "results": [],
                    "note": "No orphan drug designations found",
                })));
            }
            fallback
                .json::<Value>()
                .await
                .map_err(|e| ToolError::Malformed(e.to_string()))?
        } else if !primary.status().is_success() {
            return Ok(render(&json!({
                "total": 0,
                "results": [],
                "note": format!("FDA API returned {}", primary.status().as_u16()),
            })));
        } else {
            primary
                .json::<Value>()
                .await
                .map_err(|e| ToolError::Malformed(e.to_string()))?
        };

        let results: Vec<Value> = body["results"]
            .as_array()
            .map(|list| {
                list.iter()
                    .take(limit as usize)
                    .map(|item| {
                        let openfda = &item["openfda"];
                        let products: Vec<Value> = item["products"]
                            .as_array()
                            .map(|prods| {
                                prods
                                    .iter()
                                    .take(3)
                                    .map(|p| {
                                        json!({
                                            "name": p["brand_name"],
                                            "dosage": p["dosage_form"],
                                            "active_ingredients": p.get("active_ingredients")
                                                .cloned().unwrap_or_else(|| json!([])),
                                        })
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        json!({
                            "brand_name": openfda.get("brand_name").cloned().unwrap_or_else(|| json!([])),
                            "generic_name": openfda.get("generic_name").cloned().unwrap_or_else(|| json!([])),
                            "manufacturer": openfda.get("manufacturer_name").cloned().unwrap_or_else(|| json!([])),
                            "route": openfda.get("route").cloned().unwrap_or_else(|| json!([])),
                            "products": products,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({ "total": results.len(), "results": results })))
    }

    async fn search_open_targets(&self, args: &Value) -> Result<String, ToolError> {
        let disease_query = required_str(args, "disease_query")?;
        let size = int_arg(args, "size", 10, 25);

        // Two-step GraphQL flow: resolve the disease id, then fetch its
        // associated targets.
        let search_payload = json!({
            "query": "query ($q: String!) {\n\
                search(queryString: $q, entityNames: [\"disease\"], page: {size: 1, index: 0}) {\n\
                    hits { id name }\n\
                }\n\
            }",
            "variables": { "q": disease_query },
        });
        let search = self.post_graphql(&search_payload).await?;

        let hits = search
            .pointer("/data/search/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(hit) = hits.first() else {
            return Ok(render(&json!({
                "total": 0,
                "associations": [],
                "note": "Disease not found in Open Targets",
            })));
        };
        let disease_id = hit["id"].as_str().unwrap_or_default().to_string();
        let disease_name = hit["name"].clone();

        let assoc_payload = json!({
            "query": "query ($diseaseId: String!, $size: Int!) {\n\
                disease(efoId: $diseaseId) {\n\
                    associatedTargets(page: {size: $size, index: 0}) {\n\
                        count\n\
                        rows {\n\
                            target { id approvedSymbol approvedName }\n\
                            score\n\
                            datatypeScores { id score }\n\
                        }\n\
                    }\n\
                }\n\
            }",
            "variables": { "diseaseId": disease_id, "size": size },
        });
        let assoc = self.post_graphql(&assoc_payload).await?;

        let assoc_data = assoc
            .pointer("/data/disease/associatedTargets")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let top_targets: Vec<Value> = assoc_data["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        let evidence: serde_json::Map<String, Value> = row["datatypeScores"]
                            .as_array()
                            .map(|scores| {
                                scores
                                    .iter()
                                    .filter_map(|d| {
                                        let id = d["id"].as_str()?;
                                        let score = d["score"].as_f64()?;
                                        Some((id.to_string(), json!(round3(score))))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        json!({
                            "target_id": row["target"]["id"],
                            "symbol": row["target"]["approvedSymbol"],
                            "name": row["target"]["approvedName"],
                            "overall_score": round3(row["score"].as_f64().unwrap_or(0.0)),
                            "evidence_scores": evidence,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(render(&json!({
            "disease": disease_name,
            "disease_id": disease_id,
            "total_associations": assoc_data.get("count").cloned().unwrap_or(json!(0)),
            "top_targets": top_targets,
        })))
    }

    async fn post_graphql(&self, payload: &Value) -> Result<Value, ToolError> {
        let response = self.http.post(OPEN_TARGETS_API).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::UpstreamStatus(status.to_string()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_table_covers_eight_tools() {
        assert_eq!(PUBLIC_TOOLS.len(), 8);
        assert!(public_tool("search_pubmed").is_some());
        assert!(public_tool("search_everything").is_none());
    }

    #[test]
    fn required_arguments_are_declared() {
        let details = public_tool("get_trial_details").unwrap();
        assert_eq!(details.input_schema["required"][0], "nct_id");
        let trials = public_tool("search_clinical_trials").unwrap();
        assert!(trials.input_schema["required"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invoke_rejects_unknown_tool() {
        let client = PublicToolClient::new(reqwest::Client::new());
        let err = client
            .invoke("search_everything", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let client = PublicToolClient::new(reqwest::Client::new());
        let err = client.invoke("search_pubmed", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }
}
