use serde_json::Value;

use crate::core::jenkins::{JobInfo, JobSummary, ParameterDefinition};

pub fn format_jobs(jobs: &[JobSummary]) -> String {
    if jobs.is_empty() {
        return "No jobs found.".to_string();
    }

    let width = jobs
        .iter()
        .map(|job| job.fullname.chars().count())
        .max()
        .unwrap_or(0);
    jobs.iter()
        .map(|job| format!("{:<width$} ({})", job.fullname, job.url, width = width))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn format_running_jobs(jobs: &[JobInfo]) -> String {
    if jobs.is_empty() {
        return "No running jobs.".to_string();
    }

    jobs.iter()
        .map(|job| {
            let last_build = job
                .last_build
                .as_ref()
                .map(|b| b.url.as_str())
                .unwrap_or_default();
            let health = job
                .health_report
                .first()
                .map(|h| h.description.as_str())
                .unwrap_or_default();
            format!("{} ({})\n{}", job.name, last_build, health)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn format_params(params: &[ParameterDefinition]) -> String {
    if params.is_empty() {
        return "This job is not parameterized.".to_string();
    }

    let mut out = String::new();
    for param in params {
        let default = param
            .default_parameter_value
            .as_ref()
            .map(|d| display_value(&d.value))
            .unwrap_or_default();
        out.push_str(&format!(
            "Type: {}\nDescription: {}\nDefault Value: {}\nParameter Name: {}\n\n",
            param.kind,
            param.description.as_deref().unwrap_or_default(),
            default,
            param.name
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jenkins::{BuildRef, DefaultParameterValue, HealthReport};
    use serde_json::json;

    fn summary(fullname: &str) -> JobSummary {
        JobSummary {
            name: fullname.to_string(),
            fullname: fullname.to_string(),
            url: format!("http://jenkins/job/{fullname}/"),
            color: "blue".to_string(),
        }
    }

    #[test]
    fn jobs_are_padded_to_the_longest_name() {
        let out = format_jobs(&[summary("api"), summary("frontend")]);
        assert_eq!(
            out,
            "api      (http://jenkins/job/api/)\nfrontend (http://jenkins/job/frontend/)"
        );
        assert_eq!(format_jobs(&[]), "No jobs found.");
    }

    #[test]
    fn running_jobs_show_last_build_and_health() {
        let job = JobInfo {
            name: "api".to_string(),
            last_build: Some(BuildRef {
                number: 7,
                url: "http://jenkins/job/api/7/".to_string(),
            }),
            health_report: vec![HealthReport {
                description: "Build stability: No recent builds failed.".to_string(),
            }],
            ..JobInfo::default()
        };
        assert_eq!(
            format_running_jobs(&[job.clone(), job]),
            "api (http://jenkins/job/api/7/)\nBuild stability: No recent builds failed.\n\n\
             api (http://jenkins/job/api/7/)\nBuild stability: No recent builds failed."
        );
        assert_eq!(format_running_jobs(&[]), "No running jobs.");
    }

    #[test]
    fn params_list_every_field() {
        let params = vec![
            ParameterDefinition {
                kind: "StringParameterDefinition".to_string(),
                name: "BRANCH".to_string(),
                description: Some("branch to build".to_string()),
                default_parameter_value: Some(DefaultParameterValue {
                    value: json!("master"),
                }),
            },
            ParameterDefinition {
                kind: "BooleanParameterDefinition".to_string(),
                name: "CLEAN".to_string(),
                description: None,
                default_parameter_value: Some(DefaultParameterValue { value: json!(false) }),
            },
        ];
        assert_eq!(
            format_params(&params),
            "Type: StringParameterDefinition\nDescription: branch to build\n\
             Default Value: master\nParameter Name: BRANCH\n\n\
             Type: BooleanParameterDefinition\nDescription: \n\
             Default Value: false\nParameter Name: CLEAN\n\n"
        );
        assert_eq!(format_params(&[]), "This job is not parameterized.");
    }
}
