mod job_state;
